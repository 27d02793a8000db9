//! CFG lowering to machine code.
//!
//! Walks each definition's blocks in insertion order, assigns every
//! parameter, local and temporary a naturally aligned slot below `%rbp`, and
//! lowers the three-address operations to instruction records for the
//! encoder. Operands move through a fixed scratch assignment: AX as the
//! primary, CX secondary, DX for division spill-over, R11 for pointer
//! indirection, SI/DI/CX for block copies. Calls follow the System V
//! classification; register allocation beyond this fixed assignment is out
//! of scope.
//!
//! Object (non-function) definitions build their initialized data image
//! directly from the IR assignments.

use super::abi::{self, classify, classify_call, classify_signature, ParamClass};
use super::instr::{Address, Cond, Immediate, Instruction, Mem, Opcode, Operands, Reg, Register};
use crate::elf::ElfWriter;
use crate::error::{CompileError, CompileResult};
use crate::ir::{BlockId, Definition, IrOp, Op, Terminator, Var, VarKind};
use crate::session::Session;
use crate::symtab::{Linkage, SymbolId, SymbolKind};
use crate::types::{TypeId, TypeTable};
use bumpalo::{collections::Vec as BumpVec, Bump};

/// Integer argument registers in ABI order.
const ARG_REGS: [Register; 6] = [
    Register::Di,
    Register::Si,
    Register::Dx,
    Register::Cx,
    Register::R8,
    Register::R9,
];

fn round_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// Operand width for a scalar of the given byte size.
fn width(size: u32) -> u8 {
    debug_assert!(matches!(size, 1 | 2 | 4 | 8));
    size as u8
}

/// Width of an aggregate chunk: the largest load not exceeding eight bytes.
fn chunk_width(remaining: u32) -> u8 {
    match remaining {
        1 => 1,
        2 => 2,
        3..=4 => 4,
        _ => 8,
    }
}

/// Per-function frame layout: stack slot assignments and the metadata the
/// va builtins need.
struct FunctionFrame<'b> {
    slots: BumpVec<'b, (SymbolId, i32)>,
    offset: i32,
    /// Offset of the register save area for variadic functions, zero when
    /// absent.
    reg_save_area: i32,
    /// Slot holding the hidden return pointer for MEMORY returns.
    ret_ptr_slot: Option<i32>,
    /// Integer registers consumed by named parameters (including the hidden
    /// return pointer).
    named_gp: u32,
    /// Bytes of named parameters passed on the stack.
    named_stack: u32,
}

impl<'b> FunctionFrame<'b> {
    fn new(bump: &'b Bump) -> Self {
        FunctionFrame {
            slots: BumpVec::new_in(bump),
            offset: 0,
            reg_save_area: 0,
            ret_ptr_slot: None,
            named_gp: 0,
            named_stack: 0,
        }
    }

    /// Allocate a naturally aligned slot below the frame pointer.
    fn allocate(&mut self, sym: SymbolId, size: u32, align: u32) -> i32 {
        let size = size.max(1) as i32;
        let align = align.max(1) as i32;
        let mut offset = self.offset - size;
        offset -= offset.rem_euclid(align);
        self.slots.push((sym, offset));
        self.offset = offset;
        offset
    }

    fn allocate_anonymous(&mut self, size: u32, align: u32) -> i32 {
        let size = size.max(1) as i32;
        let align = align.max(1) as i32;
        let mut offset = self.offset - size;
        offset -= offset.rem_euclid(align);
        self.offset = offset;
        offset
    }

    /// Record a parameter that lives in the caller's frame.
    fn record(&mut self, sym: SymbolId, offset: i32) {
        self.slots.push((sym, offset));
    }

    fn lookup(&self, sym: SymbolId) -> Option<i32> {
        self.slots
            .iter()
            .rev()
            .find(|(s, _)| *s == sym)
            .map(|&(_, off)| off)
    }

    fn size(&self) -> u32 {
        round_up((-self.offset) as u32, 16)
    }
}

pub struct CodeGen<'a> {
    sess: &'a mut Session,
    elf: &'a mut ElfWriter,
}

impl<'a> CodeGen<'a> {
    pub fn new(sess: &'a mut Session, elf: &'a mut ElfWriter) -> Self {
        CodeGen { sess, elf }
    }

    /// Lower one definition: machine code for functions, a data image for
    /// objects.
    pub fn compile(&mut self, def: &Definition) -> CompileResult<()> {
        let ty = self.sess.syms.get(def.symbol).ty;
        if self.sess.types.is_function(ty) {
            self.compile_function(def)
        } else {
            self.compile_data(def)
        }
    }

    // ==== OBJECT DATA ====

    fn compile_data(&mut self, def: &Definition) -> CompileResult<()> {
        let sym = def.symbol;
        let ty = self.sess.syms.get(sym).ty;
        let size = self.sess.types.size_of(ty) as usize;
        let mut image = vec![0u8; size];
        let mut relocs: Vec<(u64, SymbolId, i64)> = Vec::new();

        for block in &def.blocks {
            for op in &block.code {
                if op.op != IrOp::Assign
                    || op.target.kind != VarKind::Direct
                    || op.target.symbol != Some(sym)
                    || !op.a.is_immediate()
                {
                    return Err(CompileError::type_error(format!(
                        "global initializer for '{}' is not constant",
                        self.sess.syms.get(sym).name
                    )));
                }
                let offset = op.target.offset as usize;
                let tsize = self.sess.types.size_of(op.target.ty) as usize;
                match op.a.symbol {
                    Some(value_sym) if self.sess.types.is_array(op.target.ty) => {
                        // String literal stored inline in a char array.
                        let text = self
                            .sess
                            .syms
                            .get(value_sym)
                            .string_value
                            .clone()
                            .unwrap_or_default();
                        let bytes = text.as_bytes();
                        image[offset..offset + bytes.len()].copy_from_slice(bytes);
                    }
                    Some(value_sym) => {
                        // Pointer to another object: absolute relocation.
                        relocs.push((offset as u64, value_sym, i64::from(op.a.offset)));
                    }
                    None => {
                        let bytes = op.a.imm.to_le_bytes();
                        image[offset..offset + tsize.min(8)]
                            .copy_from_slice(&bytes[..tsize.min(8)]);
                    }
                }
            }
        }

        let align = abi::sym_alignment(&self.sess.types, ty);
        self.elf.add_data_object(sym, &image, u64::from(align));
        for (offset, value_sym, addend) in relocs {
            self.elf.add_data_reloc(offset, value_sym, addend);
        }
        Ok(())
    }

    // ==== FUNCTIONS ====

    fn compile_function(&mut self, def: &Definition) -> CompileResult<()> {
        let fsym = def.symbol;
        let fty = self.sess.syms.get(fsym).ty;
        let name = self.sess.syms.get(fsym).name.clone();
        log::debug!("compiling function '{}'", name);

        let bump = Bump::new();
        let mut frame = FunctionFrame::new(&bump);
        let (param_classes, ret_class) = classify_signature(&self.sess.types, fty);
        let vararg = self.sess.types.is_vararg(fty);
        let ret_memory = ret_class[0] == ParamClass::Memory;

        if vararg {
            frame.reg_save_area = frame.allocate_anonymous(48, 8);
        }
        if ret_memory {
            frame.ret_ptr_slot = Some(frame.allocate_anonymous(8, 8));
            frame.named_gp = 1;
        }

        // Parameter slots: register-passed parameters spill to locals,
        // memory-passed ones stay in the caller's frame above rbp+16.
        struct ParamMove {
            slot: i32,
            chunks: Vec<(u32, u8)>,
            first_reg: usize,
        }
        let mut moves: Vec<ParamMove> = Vec::new();
        for (i, &psym) in def.params.iter().enumerate() {
            let pty = self.sess.syms.get(psym).ty;
            let size = self.sess.types.size_of(pty);
            let align = abi::sym_alignment(&self.sess.types, pty);
            if param_classes[i][0] == ParamClass::Memory {
                frame.record(psym, 16 + frame.named_stack as i32);
                frame.named_stack += round_up(size, 8);
            } else if param_classes[i][0] == ParamClass::Sse {
                return Err(CompileError::type_error(
                    "floating-point parameter passing is not supported",
                ));
            } else {
                let slot = frame.allocate(psym, size, align);
                let mut chunks = Vec::new();
                let mut done = 0u32;
                while done < size {
                    chunks.push((done, chunk_width(size - done)));
                    done += 8;
                }
                moves.push(ParamMove {
                    slot,
                    chunks,
                    first_reg: frame.named_gp as usize,
                });
                frame.named_gp += param_classes[i].len() as u32;
            }
        }

        for &lsym in &def.locals {
            let lty = self.sess.syms.get(lsym).ty;
            let size = self.sess.types.size_of(lty);
            let align = abi::sym_alignment(&self.sess.types, lty);
            frame.allocate(lsym, size, align);
        }

        self.elf.begin_function(fsym);

        // Prologue.
        self.elf.emit(&Instruction::new(
            Opcode::Push,
            Operands::Reg(Reg::new(Register::Bp, 8)),
        ));
        self.elf.emit(&Instruction::new(
            Opcode::Mov,
            Operands::RegReg(Reg::new(Register::Sp, 8), Reg::new(Register::Bp, 8)),
        ));
        let frame_size = frame.size();
        if frame_size > 0 {
            self.elf.emit(&Instruction::new(
                Opcode::Sub,
                Operands::ImmReg(
                    Immediate::int(8, i64::from(frame_size)),
                    Reg::new(Register::Sp, 8),
                ),
            ));
        }
        if vararg {
            for (i, &reg) in ARG_REGS.iter().enumerate() {
                self.store_to_mem(
                    Reg::new(reg, 8),
                    Mem::new(
                        8,
                        Address::base(Register::Bp, frame.reg_save_area + 8 * i as i32),
                    ),
                );
            }
        }
        if let Some(slot) = frame.ret_ptr_slot {
            self.store_to_mem(
                Reg::new(Register::Di, 8),
                Mem::new(8, Address::base(Register::Bp, slot)),
            );
        }
        for m in &moves {
            for (j, &(chunk_off, cw)) in m.chunks.iter().enumerate() {
                let reg = ARG_REGS[m.first_reg + j];
                self.store_to_mem(
                    Reg::new(reg, cw),
                    Mem::new(cw, Address::base(Register::Bp, m.slot + chunk_off as i32)),
                );
            }
        }

        // Blocks in insertion order; fall-through jumps to the next block
        // are elided.
        let ret_ty = self.sess.types.return_type(fty);
        for (i, block) in def.blocks.iter().enumerate() {
            self.elf.place_label(block.label);
            let mut pending_params: Vec<Var> = Vec::new();
            for op in &block.code {
                self.lower_op(&mut frame, op, &mut pending_params)?;
            }
            let next = def
                .blocks
                .get(i + 1)
                .map(|_| BlockId(i as u32 + 1));
            self.lower_terminator(&mut frame, def, &block.terminator, next, ret_ty, &ret_class)?;
        }

        self.elf.end_function();
        Ok(())
    }

    fn epilogue(&mut self) {
        self.elf.emit(&Instruction::nullary(Opcode::Leave));
        self.elf.emit(&Instruction::nullary(Opcode::Ret));
    }

    fn lower_terminator(
        &mut self,
        frame: &mut FunctionFrame,
        def: &Definition,
        terminator: &Terminator,
        next: Option<BlockId>,
        ret_ty: TypeId,
        ret_class: &[ParamClass],
    ) -> CompileResult<()> {
        match terminator {
            Terminator::None => {
                // Falling off the end of the function returns void.
                self.epilogue();
            }
            Terminator::Jump(target) => {
                if Some(*target) != next {
                    let label = def.block(*target).label;
                    self.elf.emit(&Instruction::new(
                        Opcode::Jmp,
                        Operands::Imm(Immediate::addr(label, 0)),
                    ));
                }
            }
            Terminator::Branch(cond, then_b, else_b) => {
                let w = width(self.sess.types.size_of(cond.ty).clamp(1, 8));
                self.load(frame, cond, Register::Ax)?;
                self.elf.emit(&Instruction::new(
                    Opcode::Cmp,
                    Operands::ImmReg(Immediate::int(w, 0), Reg::new(Register::Ax, w)),
                ));
                let else_label = def.block(*else_b).label;
                self.elf.emit(&Instruction::new(
                    Opcode::Jcc(Cond::Z),
                    Operands::Imm(Immediate::addr(else_label, 0)),
                ));
                if Some(*then_b) != next {
                    let then_label = def.block(*then_b).label;
                    self.elf.emit(&Instruction::new(
                        Opcode::Jmp,
                        Operands::Imm(Immediate::addr(then_label, 0)),
                    ));
                }
            }
            Terminator::Return(None) => {
                self.epilogue();
            }
            Terminator::Return(Some(v)) => {
                match ret_class[0] {
                    ParamClass::Memory => {
                        // Copy the value through the hidden pointer, which
                        // is also the return value in RAX.
                        let slot = frame.ret_ptr_slot.expect("memory return without slot");
                        self.load_address(frame, v, Register::Si)?;
                        self.load_from_mem(
                            Mem::new(8, Address::base(Register::Bp, slot)),
                            Reg::new(Register::Di, 8),
                        );
                        let size = self.sess.types.size_of(v.ty);
                        self.emit_block_copy(size);
                        self.load_from_mem(
                            Mem::new(8, Address::base(Register::Bp, slot)),
                            Reg::new(Register::Ax, 8),
                        );
                    }
                    ParamClass::Sse => {
                        return Err(CompileError::type_error(
                            "floating-point return is not supported",
                        ));
                    }
                    _ => {
                        let size = self.sess.types.size_of(ret_ty);
                        if self.sess.types.is_scalar(ret_ty) {
                            self.load(frame, v, Register::Ax)?;
                        } else {
                            // Small aggregate returned in AX:DX.
                            self.load_address(frame, v, Register::Si)?;
                            self.load_from_mem(
                                Mem::new(
                                    chunk_width(size),
                                    Address::base(Register::Si, 0),
                                ),
                                Reg::new(Register::Ax, chunk_width(size)),
                            );
                            if size > 8 {
                                let cw = chunk_width(size - 8);
                                self.load_from_mem(
                                    Mem::new(cw, Address::base(Register::Si, 8)),
                                    Reg::new(Register::Dx, cw),
                                );
                            }
                        }
                    }
                }
                self.epilogue();
            }
        }
        Ok(())
    }

    // ==== OPERAND ACCESS ====

    fn slot_of(&self, frame: &FunctionFrame, sym: SymbolId) -> CompileResult<i32> {
        frame.lookup(sym).ok_or_else(|| {
            CompileError::type_error(format!(
                "no stack slot for symbol '{}'",
                self.sess.syms.get(sym).name
            ))
        })
    }

    fn is_static(&self, sym: SymbolId) -> bool {
        let s = self.sess.syms.get(sym);
        s.linkage != Linkage::None || s.kind == SymbolKind::StringValue
    }

    /// Memory operand for a direct or deref variable. Deref operands load
    /// the pointer into R11 first.
    fn mem_of(&mut self, frame: &FunctionFrame, v: &Var, w: u8) -> CompileResult<Mem> {
        let sym = v.symbol.expect("memory operand without symbol");
        match v.kind {
            VarKind::Direct => {
                if self.is_static(sym) {
                    Ok(Mem::new(w, Address::symbol(sym, v.offset)))
                } else {
                    let slot = self.slot_of(frame, sym)?;
                    Ok(Mem::new(w, Address::base(Register::Bp, slot + v.offset)))
                }
            }
            VarKind::Deref => {
                let ptr = if self.is_static(sym) {
                    Mem::new(8, Address::symbol(sym, 0))
                } else {
                    let slot = self.slot_of(frame, sym)?;
                    Mem::new(8, Address::base(Register::Bp, slot))
                };
                self.load_from_mem(ptr, Reg::new(Register::R11, 8));
                Ok(Mem::new(w, Address::base(Register::R11, v.offset)))
            }
            _ => unreachable!("mem_of on non-memory operand"),
        }
    }

    fn load_from_mem(&mut self, mem: Mem, reg: Reg) {
        self.elf
            .emit(&Instruction::new(Opcode::Mov, Operands::MemReg(mem, reg)));
    }

    fn store_to_mem(&mut self, reg: Reg, mem: Mem) {
        self.elf
            .emit(&Instruction::new(Opcode::Mov, Operands::RegMem(reg, mem)));
    }

    /// Load a scalar operand into the given register at its natural width.
    fn load(&mut self, frame: &FunctionFrame, v: &Var, reg: Register) -> CompileResult<()> {
        let size = self.sess.types.size_of(v.ty).clamp(1, 8);
        let w = width(size);
        match v.kind {
            VarKind::Immediate => match v.symbol {
                Some(sym) => {
                    self.elf.emit(&Instruction::new(
                        Opcode::Mov,
                        Operands::ImmReg(Immediate::addr(sym, v.offset), Reg::new(reg, 8)),
                    ));
                }
                None => {
                    self.elf.emit(&Instruction::new(
                        Opcode::Mov,
                        Operands::ImmReg(Immediate::int(w, v.imm), Reg::new(reg, w)),
                    ));
                }
            },
            VarKind::Direct | VarKind::Deref => {
                let mem = self.mem_of(frame, v, w)?;
                self.load_from_mem(mem, Reg::new(reg, w));
            }
            VarKind::Address => {
                self.load_address(frame, v, reg)?;
            }
        }
        Ok(())
    }

    /// Load the address of a memory-resident operand.
    fn load_address(
        &mut self,
        frame: &FunctionFrame,
        v: &Var,
        reg: Register,
    ) -> CompileResult<()> {
        let sym = v.symbol.expect("address of operand without symbol");
        match v.kind {
            VarKind::Direct | VarKind::Address => {
                if self.is_static(sym) {
                    self.elf.emit(&Instruction::new(
                        Opcode::Mov,
                        Operands::ImmReg(Immediate::addr(sym, v.offset), Reg::new(reg, 8)),
                    ));
                } else {
                    let slot = self.slot_of(frame, sym)?;
                    self.elf.emit(&Instruction::new(
                        Opcode::Lea,
                        Operands::MemReg(
                            Mem::new(8, Address::base(Register::Bp, slot + v.offset)),
                            Reg::new(reg, 8),
                        ),
                    ));
                }
            }
            VarKind::Deref => {
                // Address is the pointer value plus the offset.
                let ptr = Var {
                    kind: VarKind::Direct,
                    offset: 0,
                    ..*v
                };
                let mem = self.mem_of(frame, &ptr, 8)?;
                self.load_from_mem(mem, Reg::new(reg, 8));
                if v.offset != 0 {
                    self.elf.emit(&Instruction::new(
                        Opcode::Add,
                        Operands::ImmReg(
                            Immediate::int(8, i64::from(v.offset)),
                            Reg::new(reg, 8),
                        ),
                    ));
                }
            }
            VarKind::Immediate => {
                // String literal address.
                self.elf.emit(&Instruction::new(
                    Opcode::Mov,
                    Operands::ImmReg(Immediate::addr(sym, v.offset), Reg::new(reg, 8)),
                ));
            }
        }
        Ok(())
    }

    /// Store the register into the target lvalue.
    fn store(&mut self, frame: &FunctionFrame, reg: Register, target: &Var) -> CompileResult<()> {
        let size = self.sess.types.size_of(target.ty).clamp(1, 8);
        let w = width(size);
        let mem = self.mem_of(frame, target, w)?;
        self.store_to_mem(Reg::new(reg, w), mem);
        Ok(())
    }

    /// Copy CX-counted eight-byte blocks plus a remainder from [SI] to
    /// [DI]. Source and destination addresses must already be loaded.
    fn emit_block_copy(&mut self, size: u32) {
        let count = size / 8;
        if count > 0 {
            self.elf.emit(&Instruction::new(
                Opcode::Mov,
                Operands::ImmReg(Immediate::int(8, i64::from(count)), Reg::new(Register::Cx, 8)),
            ));
            self.elf.emit(&Instruction::nullary(Opcode::RepMovsq));
        }
        // rep movsq advanced rsi/rdi; move the remainder in shrinking
        // chunks.
        let mut done = 0u32;
        let mut remaining = size % 8;
        while remaining > 0 {
            let cw = match remaining {
                1 => 1,
                2..=3 => 2,
                _ => 4,
            };
            self.load_from_mem(
                Mem::new(cw, Address::base(Register::Si, done as i32)),
                Reg::new(Register::Ax, cw),
            );
            self.store_to_mem(
                Reg::new(Register::Ax, cw),
                Mem::new(cw, Address::base(Register::Di, done as i32)),
            );
            done += u32::from(cw);
            remaining -= u32::from(cw);
        }
    }

    fn is_aggregate(&self, ty: TypeId) -> bool {
        self.sess.types.is_struct_or_union(ty) || self.sess.types.is_array(ty)
    }

    // ==== OPERATIONS ====

    fn lower_op(
        &mut self,
        frame: &mut FunctionFrame,
        op: &Op,
        pending_params: &mut Vec<Var>,
    ) -> CompileResult<()> {
        match op.op {
            IrOp::Assign | IrOp::Load => self.lower_assign(frame, &op.target, &op.a),
            IrOp::Cast => self.lower_cast(frame, &op.target, &op.a),
            IrOp::Addr => {
                self.load_address(frame, &op.a, Register::Ax)?;
                self.store(frame, Register::Ax, &op.target)
            }
            IrOp::Not => {
                let w = width(self.sess.types.size_of(op.target.ty).clamp(1, 8));
                self.load(frame, &op.a, Register::Ax)?;
                self.elf.emit(&Instruction::new(
                    Opcode::Not,
                    Operands::Reg(Reg::new(Register::Ax, w)),
                ));
                self.store(frame, Register::Ax, &op.target)
            }
            IrOp::Add
            | IrOp::Sub
            | IrOp::Mul
            | IrOp::Div
            | IrOp::Mod
            | IrOp::And
            | IrOp::Or
            | IrOp::Xor
            | IrOp::Shl
            | IrOp::Shr => self.lower_arithmetic(frame, op),
            IrOp::Eq | IrOp::Ge | IrOp::Gt => self.lower_compare(frame, op),
            IrOp::Param => {
                pending_params.push(op.a);
                Ok(())
            }
            IrOp::Call => {
                let params = std::mem::take(pending_params);
                self.lower_call(frame, op, params)
            }
            IrOp::VaStart => self.lower_va_start(frame, &op.a),
            IrOp::VaArg => self.lower_va_arg(frame, op),
        }
    }

    fn lower_assign(
        &mut self,
        frame: &mut FunctionFrame,
        target: &Var,
        source: &Var,
    ) -> CompileResult<()> {
        let size = self.sess.types.size_of(target.ty);
        if self.is_aggregate(target.ty) || size > 8 {
            self.load_address(frame, source, Register::Si)?;
            self.load_address(frame, target, Register::Di)?;
            self.emit_block_copy(size);
            return Ok(());
        }
        self.load(frame, source, Register::Ax)?;
        self.store(frame, Register::Ax, target)
    }

    fn lower_cast(
        &mut self,
        frame: &mut FunctionFrame,
        target: &Var,
        source: &Var,
    ) -> CompileResult<()> {
        let dst_size = self.sess.types.size_of(target.ty).clamp(1, 8);
        let src_size = self.sess.types.size_of(source.ty).clamp(1, 8);
        let dw = width(dst_size);

        if source.is_immediate() || dst_size <= src_size {
            // Truncation reads the low bytes in place.
            let narrowed = Var {
                ty: target.ty,
                ..*source
            };
            self.load(frame, &narrowed, Register::Ax)?;
            return self.store(frame, Register::Ax, target);
        }

        // Widening load with sign or zero extension.
        let signed = !self.sess.types.is_unsigned(source.ty)
            && !self.sess.types.is_pointer(source.ty);
        let sw = width(src_size);
        let mem = self.mem_of(frame, source, sw)?;
        if signed {
            self.elf.emit(&Instruction::new(
                Opcode::Movsx,
                Operands::MemReg(mem, Reg::new(Register::Ax, dw)),
            ));
        } else if sw == 4 {
            // A 32-bit load zero-extends to 64 bits on its own.
            self.load_from_mem(mem, Reg::new(Register::Ax, 4));
        } else {
            self.elf.emit(&Instruction::new(
                Opcode::Movzx,
                Operands::MemReg(mem, Reg::new(Register::Ax, dw)),
            ));
        }
        self.store(frame, Register::Ax, target)
    }

    fn lower_arithmetic(&mut self, frame: &mut FunctionFrame, op: &Op) -> CompileResult<()> {
        let b = op.b.expect("binary operation without second operand");
        let w = width(self.sess.types.size_of(op.target.ty).clamp(1, 8));
        self.load(frame, &op.a, Register::Ax)?;
        self.load(frame, &b, Register::Cx)?;

        let ax = Reg::new(Register::Ax, w);
        let cx = Reg::new(Register::Cx, w);
        let mut result = Register::Ax;
        match op.op {
            IrOp::Add => self
                .elf
                .emit(&Instruction::new(Opcode::Add, Operands::RegReg(cx, ax))),
            IrOp::Sub => self
                .elf
                .emit(&Instruction::new(Opcode::Sub, Operands::RegReg(cx, ax))),
            IrOp::And => self
                .elf
                .emit(&Instruction::new(Opcode::And, Operands::RegReg(cx, ax))),
            IrOp::Or => self
                .elf
                .emit(&Instruction::new(Opcode::Or, Operands::RegReg(cx, ax))),
            IrOp::Xor => self
                .elf
                .emit(&Instruction::new(Opcode::Xor, Operands::RegReg(cx, ax))),
            IrOp::Mul => self
                .elf
                .emit(&Instruction::new(Opcode::Mul, Operands::Reg(cx))),
            IrOp::Div | IrOp::Mod => {
                let dx = Reg::new(Register::Dx, w);
                self.elf
                    .emit(&Instruction::new(Opcode::Xor, Operands::RegReg(dx, dx)));
                self.elf
                    .emit(&Instruction::new(Opcode::Div, Operands::Reg(cx)));
                if op.op == IrOp::Mod {
                    result = Register::Dx;
                }
            }
            IrOp::Shl | IrOp::Shr => {
                let cl = Reg::new(Register::Cx, 1);
                let opcode = if op.op == IrOp::Shl {
                    Opcode::Shl
                } else if self.sess.types.is_unsigned(op.target.ty) {
                    Opcode::Shr
                } else {
                    Opcode::Sar
                };
                self.elf
                    .emit(&Instruction::new(opcode, Operands::RegReg(cl, ax)));
            }
            _ => unreachable!(),
        }
        self.store(frame, result, &op.target)
    }

    fn lower_compare(&mut self, frame: &mut FunctionFrame, op: &Op) -> CompileResult<()> {
        let b = op.b.expect("comparison without second operand");
        let w = width(self.sess.types.size_of(op.a.ty).clamp(1, 8));
        self.load(frame, &op.a, Register::Ax)?;
        self.load(frame, &b, Register::Cx)?;
        // Flags reflect a - b.
        self.elf.emit(&Instruction::new(
            Opcode::Cmp,
            Operands::RegReg(Reg::new(Register::Cx, w), Reg::new(Register::Ax, w)),
        ));
        let unsigned =
            self.sess.types.is_unsigned(op.a.ty) || self.sess.types.is_pointer(op.a.ty);
        let cond = match (op.op, unsigned) {
            (IrOp::Eq, _) => Cond::Z,
            (IrOp::Gt, false) => Cond::G,
            (IrOp::Gt, true) => Cond::A,
            (IrOp::Ge, false) => Cond::Ge,
            (IrOp::Ge, true) => Cond::Ae,
            _ => unreachable!(),
        };
        self.elf.emit(&Instruction::new(
            Opcode::Setcc(cond),
            Operands::Reg(Reg::new(Register::Ax, 1)),
        ));
        self.elf.emit(&Instruction::new(
            Opcode::Movzx,
            Operands::RegReg(Reg::new(Register::Ax, 1), Reg::new(Register::Ax, 4)),
        ));
        self.store(frame, Register::Ax, &op.target)
    }

    fn lower_call(
        &mut self,
        frame: &mut FunctionFrame,
        op: &Op,
        params: Vec<Var>,
    ) -> CompileResult<()> {
        let func = op.a;
        let fty = if self.sess.types.is_pointer(func.ty) {
            self.sess.types.deref(func.ty)
        } else {
            func.ty
        };
        let ret_ty = self.sess.types.return_type(fty);
        let arg_tys: Vec<TypeId> = params.iter().map(|p| p.ty).collect();
        let (classes, ret_class) = classify_call(&self.sess.types, &arg_tys, ret_ty);
        let ret_memory = ret_class[0] == ParamClass::Memory;

        // Stack arguments first, pushed right to left, with padding to keep
        // the stack 16-byte aligned at the call.
        let mut stack_bytes = 0u32;
        for (i, class) in classes.iter().enumerate() {
            if class[0] == ParamClass::Memory {
                stack_bytes += round_up(self.sess.types.size_of(params[i].ty), 8);
            }
        }
        let pad = if (stack_bytes / 8) % 2 == 1 { 8 } else { 0 };
        if pad > 0 {
            self.elf.emit(&Instruction::new(
                Opcode::Sub,
                Operands::ImmReg(Immediate::int(8, 8), Reg::new(Register::Sp, 8)),
            ));
        }
        for i in (0..params.len()).rev() {
            if classes[i][0] != ParamClass::Memory {
                continue;
            }
            let v = &params[i];
            let size = self.sess.types.size_of(v.ty);
            if self.is_aggregate(v.ty) {
                let rounded = round_up(size, 8);
                self.elf.emit(&Instruction::new(
                    Opcode::Sub,
                    Operands::ImmReg(
                        Immediate::int(8, i64::from(rounded)),
                        Reg::new(Register::Sp, 8),
                    ),
                ));
                self.load_address(frame, v, Register::Si)?;
                self.elf.emit(&Instruction::new(
                    Opcode::Mov,
                    Operands::RegReg(Reg::new(Register::Sp, 8), Reg::new(Register::Di, 8)),
                ));
                self.emit_block_copy(size);
            } else {
                self.load(frame, v, Register::Ax)?;
                self.elf.emit(&Instruction::new(
                    Opcode::Push,
                    Operands::Reg(Reg::new(Register::Ax, 8)),
                ));
            }
        }

        // Register arguments, left to right.
        let mut next_reg = usize::from(ret_memory);
        if ret_memory {
            self.load_address(frame, &op.target, Register::Di)?;
        }
        for (i, class) in classes.iter().enumerate() {
            if class[0] == ParamClass::Memory {
                continue;
            }
            if class[0] == ParamClass::Sse {
                return Err(CompileError::type_error(
                    "floating-point argument passing is not supported",
                ));
            }
            let v = &params[i];
            let size = self.sess.types.size_of(v.ty);
            if self.is_aggregate(v.ty) {
                // Aggregate in registers: load each eight-byte from memory.
                let base = self.addr_to_scratch(frame, v)?;
                let mut done = 0u32;
                let mut j = 0usize;
                while done < size {
                    let cw = chunk_width(size - done);
                    self.load_from_mem(
                        Mem::new(cw, Address::base(base, done as i32)),
                        Reg::new(ARG_REGS[next_reg + j], cw),
                    );
                    done += 8;
                    j += 1;
                }
                next_reg += class.len();
            } else {
                self.load(frame, v, ARG_REGS[next_reg])?;
                next_reg += 1;
            }
        }

        // Variadic calls pass the number of vector registers used in AL.
        if self.sess.types.is_vararg(fty) {
            self.elf.emit(&Instruction::new(
                Opcode::Mov,
                Operands::ImmReg(Immediate::int(4, 0), Reg::new(Register::Ax, 4)),
            ));
        }

        if func.kind == VarKind::Direct && self.sess.types.is_function(func.ty) {
            let sym = func.symbol.expect("direct call without symbol");
            self.elf.emit(&Instruction::new(
                Opcode::Call,
                Operands::Imm(Immediate::addr(sym, 0)),
            ));
        } else {
            // Indirect call: the function address is a plain 64-bit value
            // whatever the declared type says.
            let fv = Var {
                ty: TypeTable::ULONG,
                ..func
            };
            self.load(frame, &fv, Register::R11)?;
            self.elf.emit(&Instruction::new(
                Opcode::Call,
                Operands::Reg(Reg::new(Register::R11, 8)),
            ));
        }

        let cleanup = stack_bytes + pad;
        if cleanup > 0 {
            self.elf.emit(&Instruction::new(
                Opcode::Add,
                Operands::ImmReg(
                    Immediate::int(8, i64::from(cleanup)),
                    Reg::new(Register::Sp, 8),
                ),
            ));
        }

        // Result.
        if self.sess.types.is_void(ret_ty) || ret_memory {
            return Ok(());
        }
        if ret_class[0] == ParamClass::Sse {
            return Err(CompileError::type_error(
                "floating-point return is not supported",
            ));
        }
        let size = self.sess.types.size_of(ret_ty);
        if self.sess.types.is_scalar(ret_ty) {
            self.store(frame, Register::Ax, &op.target)?;
        } else {
            // Small aggregate in AX:DX stored chunk-wise into the slot.
            let slot = self.slot_of(frame, op.target.symbol.expect("call target"))?;
            let c0 = chunk_width(size);
            self.store_to_mem(
                Reg::new(Register::Ax, c0),
                Mem::new(c0, Address::base(Register::Bp, slot + op.target.offset)),
            );
            if size > 8 {
                let c1 = chunk_width(size - 8);
                self.store_to_mem(
                    Reg::new(Register::Dx, c1),
                    Mem::new(c1, Address::base(Register::Bp, slot + op.target.offset + 8)),
                );
            }
        }
        Ok(())
    }

    /// Load the address of an aggregate into R10, away from the argument
    /// registers.
    fn addr_to_scratch(
        &mut self,
        frame: &FunctionFrame,
        v: &Var,
    ) -> CompileResult<Register> {
        self.load_address(frame, v, Register::R10)?;
        Ok(Register::R10)
    }

    // ==== VARIADIC BUILTINS ====

    fn va_list_mem(
        &mut self,
        frame: &FunctionFrame,
        ap: &Var,
        field_offset: i32,
        w: u8,
    ) -> CompileResult<Mem> {
        let shifted = Var {
            offset: ap.offset + field_offset,
            ..*ap
        };
        self.mem_of(frame, &shifted, w)
    }

    /// va_start writes the four va_list fields: gp_offset, fp_offset,
    /// overflow_arg_area and reg_save_area.
    fn lower_va_start(&mut self, frame: &mut FunctionFrame, ap: &Var) -> CompileResult<()> {
        let gp = 8 * frame.named_gp as i64;
        let ax4 = Reg::new(Register::Ax, 4);
        let ax8 = Reg::new(Register::Ax, 8);

        self.elf.emit(&Instruction::new(
            Opcode::Mov,
            Operands::ImmReg(Immediate::int(4, gp), ax4),
        ));
        let mem = self.va_list_mem(frame, ap, 0, 4)?;
        self.store_to_mem(ax4, mem);

        // No SSE registers are saved; fp_offset starts exhausted.
        self.elf.emit(&Instruction::new(
            Opcode::Mov,
            Operands::ImmReg(Immediate::int(4, 48), ax4),
        ));
        let mem = self.va_list_mem(frame, ap, 4, 4)?;
        self.store_to_mem(ax4, mem);

        self.elf.emit(&Instruction::new(
            Opcode::Lea,
            Operands::MemReg(
                Mem::new(
                    8,
                    Address::base(Register::Bp, 16 + frame.named_stack as i32),
                ),
                ax8,
            ),
        ));
        let mem = self.va_list_mem(frame, ap, 8, 8)?;
        self.store_to_mem(ax8, mem);

        self.elf.emit(&Instruction::new(
            Opcode::Lea,
            Operands::MemReg(
                Mem::new(8, Address::base(Register::Bp, frame.reg_save_area)),
                ax8,
            ),
        ));
        let mem = self.va_list_mem(frame, ap, 16, 8)?;
        self.store_to_mem(ax8, mem);
        Ok(())
    }

    /// va_arg branches between the register save area and the overflow
    /// area, bumping whichever cursor it consumed.
    fn lower_va_arg(&mut self, frame: &mut FunctionFrame, op: &Op) -> CompileResult<()> {
        let ap = op.a;
        let ty = op.target.ty;
        let size = self.sess.types.size_of(ty);
        let rounded = round_up(size, 8);
        let classes = classify(&self.sess.types, ty);
        let from_regs = classes[0] == ParamClass::Integer && size <= 8;

        let ax4 = Reg::new(Register::Ax, 4);
        let cx8 = Reg::new(Register::Cx, 8);
        let dx8 = Reg::new(Register::Dx, 8);

        if from_regs {
            let stack_label = self.sess.syms.create_label();
            let done_label = self.sess.syms.create_label();

            let gp_mem = self.va_list_mem(frame, &ap, 0, 4)?;
            self.load_from_mem(gp_mem, ax4);
            self.elf.emit(&Instruction::new(
                Opcode::Cmp,
                Operands::ImmReg(Immediate::int(4, 48), ax4),
            ));
            self.elf.emit(&Instruction::new(
                Opcode::Jcc(Cond::Ae),
                Operands::Imm(Immediate::addr(stack_label, 0)),
            ));

            // Register save area: value at reg_save_area + gp_offset.
            let save_mem = self.va_list_mem(frame, &ap, 16, 8)?;
            self.load_from_mem(save_mem, cx8);
            let gp_mem = self.va_list_mem(frame, &ap, 0, 4)?;
            self.load_from_mem(gp_mem, Reg::new(Register::Dx, 4));
            self.elf.emit(&Instruction::new(
                Opcode::Add,
                Operands::RegReg(dx8, cx8),
            ));
            let gp_mem = self.va_list_mem(frame, &ap, 0, 4)?;
            self.load_from_mem(gp_mem, ax4);
            self.elf.emit(&Instruction::new(
                Opcode::Add,
                Operands::ImmReg(Immediate::int(4, 8), ax4),
            ));
            let gp_mem = self.va_list_mem(frame, &ap, 0, 4)?;
            self.store_to_mem(ax4, gp_mem);
            let w = width(size.clamp(1, 8));
            self.load_from_mem(
                Mem::new(w, Address::base(Register::Cx, 0)),
                Reg::new(Register::Ax, w),
            );
            self.elf.emit(&Instruction::new(
                Opcode::Jmp,
                Operands::Imm(Immediate::addr(done_label, 0)),
            ));

            self.elf.place_label(stack_label);
            self.emit_va_overflow_fetch(frame, &ap, size, rounded)?;

            self.elf.place_label(done_label);
            self.store(frame, Register::Ax, &op.target)
        } else {
            // Aggregates and MEMORY-class values always come from the
            // overflow area.
            self.emit_va_overflow_fetch(frame, &ap, size.min(8), rounded)?;
            if self.is_aggregate(ty) {
                // CX still holds the object address; copy it into the slot.
                self.elf.emit(&Instruction::new(
                    Opcode::Mov,
                    Operands::RegReg(cx8, Reg::new(Register::Si, 8)),
                ));
                self.load_address(frame, &op.target, Register::Di)?;
                self.emit_block_copy(size);
                Ok(())
            } else {
                self.store(frame, Register::Ax, &op.target)
            }
        }
    }

    /// Fetch the next overflow-area value into AX (address left in CX) and
    /// advance the cursor.
    fn emit_va_overflow_fetch(
        &mut self,
        frame: &FunctionFrame,
        ap: &Var,
        load_size: u32,
        rounded: u32,
    ) -> CompileResult<()> {
        let cx8 = Reg::new(Register::Cx, 8);
        let dx8 = Reg::new(Register::Dx, 8);
        let overflow_mem = self.va_list_mem(frame, ap, 8, 8)?;
        self.load_from_mem(overflow_mem, cx8);
        self.elf.emit(&Instruction::new(
            Opcode::Lea,
            Operands::MemReg(Mem::new(8, Address::base(Register::Cx, rounded as i32)), dx8),
        ));
        let overflow_mem = self.va_list_mem(frame, ap, 8, 8)?;
        self.store_to_mem(dx8, overflow_mem);
        let w = width(load_size.clamp(1, 8));
        self.load_from_mem(
            Mem::new(w, Address::base(Register::Cx, 0)),
            Reg::new(Register::Ax, w),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn compile_source(source: &str) -> (Session, Vec<u8>) {
        let mut parser = Parser::from_source(source).unwrap();
        let mut defs = Vec::new();
        while let Some(def) = parser.parse().unwrap() {
            defs.push(def);
        }
        let mut sess = parser.into_session();
        let mut elf = ElfWriter::new();
        for def in &defs {
            CodeGen::new(&mut sess, &mut elf).compile(def).unwrap();
        }
        elf.emit_symbol_table_objects(&sess);
        let bytes = elf.finish(&sess).unwrap();
        (sess, bytes)
    }

    #[test]
    fn test_add_function_compiles() {
        use object::{Object as _, ObjectSection, ObjectSymbol};
        let (_, bytes) = compile_source("int add(int a, int b) { return a + b; }");
        let file = object::File::parse(&*bytes).unwrap();
        let text = file.section_by_name(".text").unwrap();
        let code = text.data().unwrap();
        assert!(!code.is_empty());
        // push %rbp; mov %rsp, %rbp
        assert_eq!(&code[..4], &[0x55, 0x48, 0x89, 0xE5]);
        let sym = file.symbols().find(|s| s.name() == Ok("add")).unwrap();
        assert_eq!(sym.address(), 0);
        assert!(sym.size() > 0);
    }

    #[test]
    fn test_global_data_image() {
        use object::{Object as _, ObjectSection};
        let (_, bytes) = compile_source("int x = 0x11223344;");
        let file = object::File::parse(&*bytes).unwrap();
        let data = file.section_by_name(".data").unwrap();
        assert_eq!(&data.data().unwrap()[..4], &[0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn test_string_pointer_global_has_relocation() {
        use object::{Object as _, ObjectSection};
        let (_, bytes) = compile_source("char *s = \"hello\";");
        let file = object::File::parse(&*bytes).unwrap();
        let data = file.section_by_name(".data").unwrap();
        let relocs: Vec<_> = data.relocations().collect();
        assert_eq!(relocs.len(), 1);
        // The string bytes themselves land in .data too.
        let all = data.data().unwrap();
        assert!(all.windows(6).any(|w| w == b"hello\0"));
    }

    #[test]
    fn test_call_generates_relocation() {
        use object::{Object as _, ObjectSection};
        let (_, bytes) =
            compile_source("int f(int x);\nint g(void) { return f(1); }");
        let file = object::File::parse(&*bytes).unwrap();
        let text = file.section_by_name(".text").unwrap();
        assert_eq!(text.relocations().count(), 1);
    }

    #[test]
    fn test_branching_function_compiles() {
        use object::{Object as _, ObjectSection};
        let (_, bytes) = compile_source(
            "int max(int a, int b) { if (a > b) return a; else return b; }",
        );
        let file = object::File::parse(&*bytes).unwrap();
        let text = file.section_by_name(".text").unwrap();
        let code = text.data().unwrap();
        // Expect at least one conditional jump (0F 8x).
        assert!(code
            .windows(2)
            .any(|w| w[0] == 0x0F && (0x80..=0x8F).contains(&w[1])));
    }

    #[test]
    fn test_loop_compiles_with_backward_jump() {
        use object::{Object as _, ObjectSection};
        let (_, bytes) = compile_source(
            "int sum(int n) { int s; int i; s = 0; for (i = 0; i < n; i++) s = s + i; return s; }",
        );
        let file = object::File::parse(&*bytes).unwrap();
        let text = file.section_by_name(".text").unwrap();
        let code = text.data().unwrap();
        // A backward jump has a negative 32-bit displacement after E9.
        let mut found_backward = false;
        for i in 0..code.len().saturating_sub(5) {
            if code[i] == 0xE9 {
                let disp = i32::from_le_bytes(code[i + 1..i + 5].try_into().unwrap());
                if disp < 0 {
                    found_backward = true;
                }
            }
        }
        assert!(found_backward);
    }
}
