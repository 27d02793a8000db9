//! System V AMD64 parameter classification.
//!
//! Each type classifies into a vector of eight-byte classes (3.2.3 in the
//! ABI, with simplifications). If the first element is not `Memory`, the
//! vector has one entry per eight-byte of the type; a `Memory` result is
//! always a single entry.

use crate::types::{TypeId, TypeKind, TypeTable};

/// Eight-byte parameter classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamClass {
    NoClass,
    Integer,
    Sse,
    Memory,
}

/// Integer argument registers in assignment order: DI, SI, DX, CX, R8, R9.
pub const INT_PARAM_REGS: usize = 6;

/// Number of eight-bytes a type occupies.
pub fn n_eightbytes(types: &TypeTable, t: TypeId) -> usize {
    (types.size_of(t) as usize + 7) / 8
}

fn has_unaligned_fields(types: &TypeTable, t: TypeId) -> bool {
    if types.is_struct_or_union(t) {
        let t = types.unwrapped(t);
        for i in 0..types.nmembers(t) {
            let member = types.member(t, i);
            let size = types.size_of(member.ty);
            if size != 0 && member.offset % size != 0 {
                return true;
            }
        }
    }
    false
}

fn combine(a: ParamClass, b: ParamClass) -> ParamClass {
    if a == b {
        return a;
    }
    if a == ParamClass::NoClass {
        return b;
    }
    if b == ParamClass::NoClass {
        return a;
    }
    if a == ParamClass::Memory || b == ParamClass::Memory {
        return ParamClass::Memory;
    }
    if a == ParamClass::Integer || b == ParamClass::Integer {
        return ParamClass::Integer;
    }
    ParamClass::Sse
}

/// Traverse the type depth first, merging each scalar's class into the
/// eight-byte slot selected by its offset.
fn flatten(types: &TypeTable, classes: &mut [ParamClass], t: TypeId, offset: u32) {
    let t = types.unwrapped(t);
    match types.kind(t) {
        TypeKind::Real | TypeKind::Unsigned | TypeKind::Signed | TypeKind::Pointer => {
            let i = (offset / 8) as usize;
            let class = if types.kind(t) == TypeKind::Real {
                ParamClass::Sse
            } else {
                ParamClass::Integer
            };
            classes[i] = combine(classes[i], class);
        }
        TypeKind::Struct | TypeKind::Union => {
            for i in 0..types.nmembers(t) {
                let member = types.member(t, i);
                flatten(types, classes, member.ty, member.offset + offset);
            }
        }
        TypeKind::Array => {
            let elem = types.next(t).unwrap();
            let elem_size = types.size_of(elem);
            for i in 0..types.size_of(t) / elem_size {
                flatten(types, classes, elem, i * elem_size + offset);
            }
        }
        _ => unreachable!("flatten on non-object type"),
    }
}

fn merge(classes: &[ParamClass]) -> bool {
    for &class in classes {
        if class == ParamClass::Memory {
            return true;
        }
    }
    false
}

/// Classify a type as a series of eight-bytes used for parameter passing
/// and return values.
pub fn classify(types: &TypeTable, t: TypeId) -> Vec<ParamClass> {
    debug_assert!(!types.is_function(t));
    debug_assert!(!types.is_void(t));

    if types.is_integer(t) || types.is_pointer(t) {
        return vec![ParamClass::Integer];
    }
    if types.is_real(t) {
        return vec![ParamClass::Sse];
    }
    if n_eightbytes(types, t) > 4 || has_unaligned_fields(types, t) {
        return vec![ParamClass::Memory];
    }
    if types.is_struct_or_union(t) || types.is_array(t) {
        let n = n_eightbytes(types, t);
        let mut classes = vec![ParamClass::NoClass; n];
        flatten(types, &mut classes, t, 0);
        if merge(&classes) {
            return vec![ParamClass::Memory];
        }
        return classes;
    }
    vec![ParamClass::Memory]
}

/// Classification of a full call: the return value first, then each
/// argument. A `Memory` return reserves the first integer register for the
/// hidden result pointer; arguments whose integer eight-bytes do not all fit
/// in the remaining registers spill entirely to the stack.
pub fn classify_call(
    types: &TypeTable,
    args: &[TypeId],
    ret: TypeId,
) -> (Vec<Vec<ParamClass>>, Vec<ParamClass>) {
    let res = if types.is_void(ret) {
        vec![ParamClass::NoClass]
    } else {
        classify(types, ret)
    };

    let mut next_integer_reg = 0usize;
    if res[0] == ParamClass::Memory {
        next_integer_reg = 1;
    }

    let mut params: Vec<Vec<ParamClass>> = args.iter().map(|&a| classify(types, a)).collect();
    for (i, &arg) in args.iter().enumerate() {
        if params[i][0] != ParamClass::Memory {
            let chunks = n_eightbytes(types, arg);
            if next_integer_reg + chunks <= INT_PARAM_REGS {
                next_integer_reg += chunks;
            } else {
                params[i] = vec![ParamClass::Memory];
            }
        }
    }

    (params, res)
}

/// Classify directly from a function type.
pub fn classify_signature(
    types: &TypeTable,
    func: TypeId,
) -> (Vec<Vec<ParamClass>>, Vec<ParamClass>) {
    debug_assert!(types.is_function(func));
    let args: Vec<TypeId> = (0..types.nmembers(func))
        .map(|i| types.member(func, i).ty)
        .collect();
    classify_call(types, &args, types.return_type(func))
}

/// Stack alignment for a symbol: arrays of at least 16 bytes align to 16.
pub fn sym_alignment(types: &TypeTable, t: TypeId) -> u32 {
    let mut align = types.alignment(t);
    if types.is_array(t) && types.size_of(t) >= 16 && align < 16 {
        align = 16;
    }
    align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_classify_integer() {
        let mut types = TypeTable::new();
        assert_eq!(classify(&types, TypeTable::INT), vec![ParamClass::Integer]);
        assert_eq!(classify(&types, TypeTable::CHAR), vec![ParamClass::Integer]);
        let ptr = types.pointer_to(TypeTable::VOID);
        assert_eq!(classify(&types, ptr), vec![ParamClass::Integer]);
        assert_eq!(classify(&types, TypeTable::DOUBLE), vec![ParamClass::Sse]);
    }

    #[test]
    fn test_small_struct_classifies_per_eightbyte() {
        // struct { int a; int b; long c; } -> 16 bytes, two INTEGER slots.
        let mut types = TypeTable::new();
        let s = types.struct_type();
        types.add_member(s, Some("a"), TypeTable::INT);
        types.add_member(s, Some("b"), TypeTable::INT);
        types.add_member(s, Some("c"), TypeTable::LONG);
        let classes = classify(&types, s);
        assert_eq!(classes, vec![ParamClass::Integer, ParamClass::Integer]);
    }

    #[test]
    fn test_large_struct_is_memory() {
        // Five eight-bytes exceed the four-eight-byte limit.
        let mut types = TypeTable::new();
        let arr = types.array_of(TypeTable::LONG, 5);
        let s = types.struct_type();
        types.add_member(s, Some("a"), arr);
        assert_eq!(classify(&types, s), vec![ParamClass::Memory]);
    }

    #[test]
    fn test_vector_length_matches_eightbytes() {
        let mut types = TypeTable::new();
        let s = types.struct_type();
        types.add_member(s, Some("x"), TypeTable::INT);
        types.add_member(s, Some("y"), TypeTable::CHAR);
        let classes = classify(&types, s);
        if classes[0] != ParamClass::Memory {
            assert_eq!(classes.len(), n_eightbytes(&types, s));
        }
    }

    #[test]
    fn test_classify_call_register_exhaustion() {
        // Seven integer arguments: the seventh spills to memory entirely.
        let types = TypeTable::new();
        let args = vec![TypeTable::INT; 7];
        let (params, res) = classify_call(&types, &args, TypeTable::INT);
        assert_eq!(res, vec![ParamClass::Integer]);
        for param in params.iter().take(6) {
            assert_eq!(param[0], ParamClass::Integer);
        }
        assert_eq!(params[6], vec![ParamClass::Memory]);
    }

    #[test]
    fn test_memory_return_consumes_first_register() {
        // A MEMORY return occupies DI, leaving five registers: with five
        // two-eightbyte structs only the first two fit.
        let mut types = TypeTable::new();
        let big = types.struct_type();
        types.add_member(big, Some("a"), TypeTable::LONG);
        types.add_member(big, Some("b"), TypeTable::LONG);
        types.add_member(big, Some("c"), TypeTable::LONG);
        types.add_member(big, Some("d"), TypeTable::LONG);
        types.add_member(big, Some("e"), TypeTable::LONG);
        let pair = types.struct_type();
        types.add_member(pair, Some("a"), TypeTable::LONG);
        types.add_member(pair, Some("b"), TypeTable::LONG);

        let args = vec![pair, pair, pair];
        let (params, res) = classify_call(&types, &args, big);
        assert_eq!(res, vec![ParamClass::Memory]);
        assert_eq!(params[0].len(), 2);
        assert_eq!(params[1].len(), 2);
        // 1 (hidden) + 2 + 2 = 5; the third pair no longer fits.
        assert_eq!(params[2], vec![ParamClass::Memory]);
    }

    #[test]
    fn test_signature_classification() {
        let mut types = TypeTable::new();
        let f = types.function(TypeTable::INT);
        types.add_member(f, Some("a"), TypeTable::INT);
        types.add_member(f, Some("b"), TypeTable::INT);
        let (params, res) = classify_signature(&types, f);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0], vec![ParamClass::Integer]);
        assert_eq!(params[1], vec![ParamClass::Integer]);
        assert_eq!(res, vec![ParamClass::Integer]);
    }

    #[test]
    fn test_array_symbol_alignment() {
        let mut types = TypeTable::new();
        let big = types.array_of(TypeTable::INT, 8);
        assert_eq!(sym_alignment(&types, big), 16);
        let small = types.array_of(TypeTable::INT, 2);
        assert_eq!(sym_alignment(&types, small), 4);
    }
}
