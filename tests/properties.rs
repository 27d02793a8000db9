//! Property-based tests for the algebraic invariants: struct layout,
//! type equality, integer promotion, ABI classification vector lengths, and
//! encoder determinism.

use cc64::types::{TypeId, TypeTable};
use cc64::x64::abi::{classify, n_eightbytes, ParamClass};
use cc64::x64::encoder::{encode, RelocKind, RelocSink};
use cc64::x64::instr::{Immediate, Instruction, Opcode, Operands, Reg, Register};
use cc64::symtab::SymbolId;
use proptest::prelude::*;

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

/// Pick one of the basic scalar types.
fn basic_type() -> impl Strategy<Value = TypeId> {
    prop_oneof![
        Just(TypeTable::CHAR),
        Just(TypeTable::SHORT),
        Just(TypeTable::INT),
        Just(TypeTable::LONG),
        Just(TypeTable::UCHAR),
        Just(TypeTable::USHORT),
        Just(TypeTable::UINT),
        Just(TypeTable::ULONG),
    ]
}

/// A member description: scalar, or a small array of a scalar.
fn member_type() -> impl Strategy<Value = (TypeId, u32)> {
    (basic_type(), 0u32..4)
}

fn integer_reg() -> impl Strategy<Value = Register> {
    prop_oneof![
        Just(Register::Ax),
        Just(Register::Cx),
        Just(Register::Dx),
        Just(Register::Bx),
        Just(Register::Si),
        Just(Register::Di),
        Just(Register::R8),
        Just(Register::R9),
        Just(Register::R10),
        Just(Register::R11),
    ]
}

#[derive(Default)]
struct RecordingSink {
    relocs: Vec<(SymbolId, RelocKind, usize, i64)>,
}

impl RelocSink for RecordingSink {
    fn add_reloc_text(&mut self, sym: SymbolId, kind: RelocKind, instr_offset: usize, addend: i64) {
        self.relocs.push((sym, kind, instr_offset, addend));
    }

    fn text_displacement(&mut self, _sym: SymbolId, _instr_offset: usize) -> i32 {
        0
    }
}

proptest! {
    /// Every member offset is a multiple of its alignment, and the struct
    /// size is a multiple of the struct alignment.
    #[test]
    fn struct_layout_is_aligned(members in prop::collection::vec(member_type(), 1..8)) {
        let mut types = TypeTable::new();
        let s = types.struct_type();
        for (i, (base, array)) in members.iter().enumerate() {
            let ty = if *array > 0 {
                types.array_of(*base, *array)
            } else {
                *base
            };
            types.add_member(s, Some(&format!("m{}", i)), ty);
        }
        for i in 0..types.nmembers(s) {
            let member = types.member(s, i).clone();
            let align = types.alignment(member.ty);
            prop_assert_eq!(member.offset % align, 0);
        }
        let align = types.alignment(s);
        prop_assert_eq!(types.size_of(s) % align, 0);
    }

    /// Equality is reflexive and symmetric; compatibility coincides with it.
    #[test]
    fn type_equality_properties(a in member_type(), b in member_type()) {
        let mut types = TypeTable::new();
        let ta = if a.1 > 0 { types.array_of(a.0, a.1) } else { a.0 };
        let tb = if b.1 > 0 { types.array_of(b.0, b.1) } else { b.0 };
        prop_assert!(types.equal(ta, ta));
        prop_assert!(types.equal(tb, tb));
        prop_assert_eq!(types.equal(ta, tb), types.equal(tb, ta));
        prop_assert_eq!(types.compatible(ta, tb), types.equal(ta, tb));
    }

    /// When the first class is not MEMORY, the vector length equals the
    /// number of eight-bytes; a MEMORY result is always a single entry.
    #[test]
    fn classification_vector_length(members in prop::collection::vec(member_type(), 1..6)) {
        let mut types = TypeTable::new();
        let s = types.struct_type();
        for (i, (base, array)) in members.iter().enumerate() {
            let ty = if *array > 0 {
                types.array_of(*base, *array)
            } else {
                *base
            };
            types.add_member(s, Some(&format!("m{}", i)), ty);
        }
        let classes = classify(&types, s);
        if classes[0] == ParamClass::Memory {
            prop_assert_eq!(classes.len(), 1);
        } else {
            prop_assert_eq!(classes.len(), n_eightbytes(&types, s));
        }
    }

    /// The common type is at least as wide as both promoted operands, and
    /// ties on width favor the unsigned operand.
    #[test]
    fn usual_arithmetic_conversion_properties(a in basic_type(), b in basic_type()) {
        let mut types = TypeTable::new();
        let common = types.usual_arithmetic_conversion(a, b);
        let pa = types.promote_integer(a);
        let pb = types.promote_integer(b);
        prop_assert!(types.size_of(common) >= types.size_of(pa).min(types.size_of(pb)));
        prop_assert!(types.size_of(common) == types.size_of(pa).max(types.size_of(pb)));
        if types.size_of(pa) == types.size_of(pb)
            && types.is_unsigned(pa) != types.is_unsigned(pb)
        {
            prop_assert!(types.is_unsigned(common));
        }
    }

    /// Encoding is deterministic: same instruction, same bytes, same
    /// relocation entries.
    #[test]
    fn encoder_is_deterministic(value in any::<i32>(), r in integer_reg(), w in prop_oneof![Just(4u8), Just(8u8)]) {
        let i = Instruction::new(
            Opcode::Mov,
            Operands::ImmReg(Immediate::int(w, i64::from(value)), Reg::new(r, w)),
        );
        let mut s1 = RecordingSink::default();
        let mut s2 = RecordingSink::default();
        let c1 = encode(&i, &mut s1);
        let c2 = encode(&i, &mut s2);
        prop_assert_eq!(c1.as_slice(), c2.as_slice());
        prop_assert_eq!(s1.relocs, s2.relocs);
        prop_assert!(c1.len <= 16);
    }

    /// Folded arithmetic matches the reference semantics at int width.
    #[test]
    fn constant_folding_matches_reference(a in any::<i32>(), b in any::<i32>()) {
        use cc64::ir::{IrOp, Var};
        use cc64::session::Session;
        use cc64::symtab::{Linkage, SymbolKind, Space};

        let mut sess = Session::new();
        let f = sess.syms.add(
            Space::Ident,
            "f",
            TypeTable::INT,
            SymbolKind::Definition,
            Linkage::Extern,
        );
        let mut def = cc64::ir::Definition::new(f, &mut sess.syms);
        let block = def.body;
        let va = Var::immediate(TypeTable::INT, i64::from(a));
        let vb = Var::immediate(TypeTable::INT, i64::from(b));
        let sum = cc64::eval::eval_expr(&mut sess, &mut def, block, IrOp::Add, va, vb).unwrap();
        prop_assert!(sum.is_constant());
        prop_assert_eq!(sum.imm, i64::from(a.wrapping_add(b)));
        let cmp = cc64::eval::eval_expr(&mut sess, &mut def, block, IrOp::Gt, va, vb).unwrap();
        prop_assert_eq!(cmp.imm, i64::from(a > b));
    }
}
