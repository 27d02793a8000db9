//! Expression evaluation into three-address IR.
//!
//! Every operation emitted here respects the IR invariants: operands are
//! converted from lvalues before use, arrays decay to pointers in r-value
//! contexts, constant subexpressions fold eagerly into immediates of the
//! post-conversion type, and the usual arithmetic conversions decide result
//! types. Logical operators and conditionals splice the control-flow graph
//! with short-circuit branches merging at fresh blocks.

use crate::error::{CompileError, CompileResult};
use crate::ir::{BlockId, Definition, IrOp, Op, Terminator, Var, VarKind};
use crate::session::Session;
use crate::symtab::Linkage;
use crate::types::{TypeId, TypeTable};

/// Allocate a fresh temporary local in the current definition.
pub fn create_var(s: &mut Session, def: &mut Definition, ty: TypeId) -> Var {
    let sym = s.syms.create_tmp(ty);
    def.locals.push(sym);
    Var::direct(sym, ty)
}

/// Truncate an immediate to the given integer type's width and signedness.
fn convert_imm(types: &TypeTable, value: i64, ty: TypeId) -> i64 {
    if types.is_pointer(ty) {
        return value;
    }
    match (types.size_of(ty), types.is_unsigned(ty)) {
        (1, false) => value as i8 as i64,
        (1, true) => value as u8 as i64,
        (2, false) => value as i16 as i64,
        (2, true) => value as u16 as i64,
        (4, false) => value as i32 as i64,
        (4, true) => value as u32 as i64,
        _ => value,
    }
}

/// Fold a pure binary operation over constants.
fn fold(op: IrOp, unsigned: bool, a: i64, b: i64) -> CompileResult<i64> {
    let value = match op {
        IrOp::Add => a.wrapping_add(b),
        IrOp::Sub => a.wrapping_sub(b),
        IrOp::Mul => a.wrapping_mul(b),
        IrOp::Div | IrOp::Mod => {
            if b == 0 {
                return Err(CompileError::type_error(
                    "division by zero in constant expression",
                ));
            }
            if unsigned {
                let (a, b) = (a as u64, b as u64);
                if op == IrOp::Div {
                    (a / b) as i64
                } else {
                    (a % b) as i64
                }
            } else if op == IrOp::Div {
                a.wrapping_div(b)
            } else {
                a.wrapping_rem(b)
            }
        }
        IrOp::And => a & b,
        IrOp::Or => a | b,
        IrOp::Xor => a ^ b,
        IrOp::Shl => a.wrapping_shl(b as u32 & 63),
        IrOp::Shr => {
            if unsigned {
                ((a as u64).wrapping_shr(b as u32 & 63)) as i64
            } else {
                a.wrapping_shr(b as u32 & 63)
            }
        }
        IrOp::Eq => (a == b) as i64,
        IrOp::Ge => {
            if unsigned {
                ((a as u64) >= (b as u64)) as i64
            } else {
                (a >= b) as i64
            }
        }
        IrOp::Gt => {
            if unsigned {
                ((a as u64) > (b as u64)) as i64
            } else {
                (a > b) as i64
            }
        }
        _ => unreachable!("fold on non-foldable op"),
    };
    Ok(value)
}

/// Emit `target = a <op> b` into a fresh temporary of the given type.
fn evaluate(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    op: IrOp,
    ty: TypeId,
    a: Var,
    b: Option<Var>,
) -> Var {
    let res = create_var(s, def, ty);
    def.emit(
        block,
        Op {
            target: res,
            op,
            a,
            b,
        },
    );
    Var {
        lvalue: false,
        ..res
    }
}

/// L-to-r-value conversion and array decay.
///
/// Arrays decay to pointer-to-element; a deref lvalue is materialized with an
/// explicit load; direct reads simply drop the lvalue flag.
pub fn rvalue(s: &mut Session, def: &mut Definition, block: BlockId, v: Var) -> Var {
    if s.types.is_array(v.ty) {
        let elem = s.types.next(s.types.unwrapped(v.ty)).unwrap();
        let pty = s.types.pointer_to(elem);
        return match v.kind {
            VarKind::Direct => Var {
                kind: VarKind::Address,
                ty: pty,
                lvalue: false,
                ..v
            },
            // String literals are immediates referring to their symbol.
            VarKind::Immediate => Var {
                ty: pty,
                lvalue: false,
                ..v
            },
            VarKind::Deref => {
                // The decayed value is the pointer itself, adjusted by the
                // accumulated offset.
                let base = Var {
                    kind: VarKind::Direct,
                    ty: pty,
                    offset: 0,
                    lvalue: false,
                    ..v
                };
                if v.offset != 0 {
                    let off = Var::immediate(TypeTable::LONG, v.offset as i64);
                    evaluate(s, def, block, IrOp::Add, pty, base, Some(off))
                } else {
                    base
                }
            }
            VarKind::Address => Var {
                ty: pty,
                lvalue: false,
                ..v
            },
        };
    }

    match v.kind {
        VarKind::Deref if v.lvalue => {
            let t = s.types.unwrapped(v.ty);
            evaluate(s, def, block, IrOp::Load, t, v, None)
        }
        _ => Var { lvalue: false, ..v },
    }
}

/// Evaluate `(T) v`.
pub fn eval_cast(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    v: Var,
    ty: TypeId,
) -> CompileResult<Var> {
    let v = rvalue(s, def, block, v);
    if s.types.is_void(ty) {
        return Ok(Var::immediate(ty, 0));
    }
    if !s.types.is_scalar(ty) || !s.types.is_scalar(v.ty) {
        if s.types.equal(v.ty, ty) {
            return Ok(Var { ty, ..v });
        }
        return Err(CompileError::type_error(format!(
            "invalid cast from '{}' to '{}'",
            s.types.display(v.ty),
            s.types.display(ty)
        )));
    }
    if v.is_constant() {
        let value = convert_imm(&s.types, v.imm, ty);
        return Ok(Var::immediate(ty, value));
    }
    if s.types.equal(v.ty, ty) && s.types.size_of(v.ty) == s.types.size_of(ty) {
        return Ok(Var { ty, ..v });
    }
    Ok(evaluate(s, def, block, IrOp::Cast, ty, v, None))
}

/// Evaluate `a = <op> b` for the one unary opcode, bitwise not.
pub fn eval_not(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    v: Var,
) -> CompileResult<Var> {
    let v = rvalue(s, def, block, v);
    if !s.types.is_integer(v.ty) {
        return Err(CompileError::type_error(
            "bitwise complement requires an integer operand",
        ));
    }
    let ty = s.types.promote_integer(v.ty);
    let v = eval_cast(s, def, block, v, ty)?;
    if v.is_constant() {
        let value = convert_imm(&s.types, !v.imm, ty);
        return Ok(Var::immediate(ty, value));
    }
    Ok(evaluate(s, def, block, IrOp::Not, ty, v, None))
}

/// Evaluate `a <op> b`, applying conversions and folding constants.
pub fn eval_expr(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    op: IrOp,
    l: Var,
    r: Var,
) -> CompileResult<Var> {
    let l = rvalue(s, def, block, l);
    let r = rvalue(s, def, block, r);

    match op {
        IrOp::Add | IrOp::Sub => eval_additive(s, def, block, op, l, r),
        IrOp::Mul | IrOp::Div | IrOp::Mod | IrOp::And | IrOp::Or | IrOp::Xor => {
            if !s.types.is_integer(l.ty) || !s.types.is_integer(r.ty) {
                return Err(CompileError::type_error(format!(
                    "operands of '{}' and '{}' where integers are required",
                    s.types.display(l.ty),
                    s.types.display(r.ty)
                )));
            }
            let ty = s.types.usual_arithmetic_conversion(l.ty, r.ty);
            let l = eval_cast(s, def, block, l, ty)?;
            let r = eval_cast(s, def, block, r, ty)?;
            if l.is_constant() && r.is_constant() {
                let value = fold(op, s.types.is_unsigned(ty), l.imm, r.imm)?;
                return Ok(Var::immediate(ty, convert_imm(&s.types, value, ty)));
            }
            Ok(evaluate(s, def, block, op, ty, l, Some(r)))
        }
        IrOp::Shl | IrOp::Shr => {
            if !s.types.is_integer(l.ty) || !s.types.is_integer(r.ty) {
                return Err(CompileError::type_error(
                    "shift operands must be integers",
                ));
            }
            // Result type is the promoted left operand.
            let ty = s.types.promote_integer(l.ty);
            let l = eval_cast(s, def, block, l, ty)?;
            let r = eval_cast(s, def, block, r, TypeTable::INT)?;
            if l.is_constant() && r.is_constant() {
                let value = fold(op, s.types.is_unsigned(ty), l.imm, r.imm)?;
                return Ok(Var::immediate(ty, convert_imm(&s.types, value, ty)));
            }
            Ok(evaluate(s, def, block, op, ty, l, Some(r)))
        }
        IrOp::Eq | IrOp::Ge | IrOp::Gt => {
            let (l, r) = if s.types.is_arithmetic(l.ty) && s.types.is_arithmetic(r.ty) {
                let ty = s.types.usual_arithmetic_conversion(l.ty, r.ty);
                (
                    eval_cast(s, def, block, l, ty)?,
                    eval_cast(s, def, block, r, ty)?,
                )
            } else if s.types.is_pointer(l.ty) && s.types.is_pointer(r.ty) {
                (l, r)
            } else if s.types.is_pointer(l.ty) && r.is_constant() && r.imm == 0 {
                let r = Var::immediate(l.ty, 0);
                (l, r)
            } else if s.types.is_pointer(r.ty) && l.is_constant() && l.imm == 0 {
                let l = Var::immediate(r.ty, 0);
                (l, r)
            } else {
                return Err(CompileError::type_error(format!(
                    "invalid comparison between '{}' and '{}'",
                    s.types.display(l.ty),
                    s.types.display(r.ty)
                )));
            };
            if l.is_constant() && r.is_constant() {
                let unsigned = s.types.is_unsigned(l.ty) || s.types.is_pointer(l.ty);
                let value = fold(op, unsigned, l.imm, r.imm)?;
                return Ok(Var::immediate(TypeTable::INT, value));
            }
            Ok(evaluate(s, def, block, op, TypeTable::INT, l, Some(r)))
        }
        _ => unreachable!("eval_expr on non-binary opcode"),
    }
}

fn eval_additive(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    op: IrOp,
    l: Var,
    r: Var,
) -> CompileResult<Var> {
    let lp = s.types.is_pointer(l.ty);
    let rp = s.types.is_pointer(r.ty);

    // Pointer arithmetic scales by element size.
    if lp && s.types.is_integer(r.ty) {
        let elem = s.types.size_of(s.types.deref(l.ty));
        if elem == 0 {
            return Err(CompileError::type_error(
                "pointer arithmetic on incomplete type",
            ));
        }
        let r = eval_cast(s, def, block, r, TypeTable::LONG)?;
        let step = Var::immediate(TypeTable::LONG, elem as i64);
        let scaled = eval_expr(s, def, block, IrOp::Mul, r, step)?;
        if l.is_constant() && scaled.is_constant() {
            let value = fold(op, false, l.imm, scaled.imm)?;
            return Ok(Var::immediate(l.ty, value));
        }
        return Ok(evaluate(s, def, block, op, l.ty, l, Some(scaled)));
    }
    if rp && s.types.is_integer(l.ty) && op == IrOp::Add {
        return eval_additive(s, def, block, op, r, l);
    }
    if lp && rp {
        if op != IrOp::Sub {
            return Err(CompileError::type_error("invalid pointer addition"));
        }
        if !s.types.equal(l.ty, r.ty) {
            return Err(CompileError::type_error(
                "subtraction of incompatible pointer types",
            ));
        }
        let elem = s.types.size_of(s.types.deref(l.ty));
        let diff = evaluate(s, def, block, IrOp::Sub, TypeTable::LONG, l, Some(r));
        let step = Var::immediate(TypeTable::LONG, elem as i64);
        return eval_expr(s, def, block, IrOp::Div, diff, step);
    }

    if !s.types.is_integer(l.ty) || !s.types.is_integer(r.ty) {
        return Err(CompileError::type_error(format!(
            "invalid operands '{}' and '{}'",
            s.types.display(l.ty),
            s.types.display(r.ty)
        )));
    }
    let ty = s.types.usual_arithmetic_conversion(l.ty, r.ty);
    let l = eval_cast(s, def, block, l, ty)?;
    let r = eval_cast(s, def, block, r, ty)?;
    if l.is_constant() && r.is_constant() {
        let value = fold(op, s.types.is_unsigned(ty), l.imm, r.imm)?;
        return Ok(Var::immediate(ty, convert_imm(&s.types, value, ty)));
    }
    Ok(evaluate(s, def, block, op, ty, l, Some(r)))
}

/// Evaluate `&v`. Requires an l-value; yields a pointer-typed r-value.
///
/// Addresses of symbols with static storage are immediates carrying the
/// symbol, so they remain valid in constant initializers.
pub fn eval_addr(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    v: Var,
) -> CompileResult<Var> {
    if !v.lvalue {
        return Err(CompileError::type_error(
            "cannot take the address of a non-lvalue",
        ));
    }
    let pty = s.types.pointer_to(v.ty);
    match v.kind {
        VarKind::Direct => {
            let sym = v.symbol.unwrap();
            if s.syms.get(sym).linkage != Linkage::None {
                let mut addr = Var::immediate_symbol(pty, sym);
                addr.offset = v.offset;
                return Ok(addr);
            }
            Ok(evaluate(s, def, block, IrOp::Addr, pty, v, None))
        }
        VarKind::Deref => {
            // &(*(p + offset)) is the pointer value plus the offset.
            let base = Var {
                kind: VarKind::Direct,
                ty: pty,
                offset: 0,
                lvalue: false,
                ..v
            };
            if v.offset != 0 {
                let off = Var::immediate(TypeTable::LONG, v.offset as i64);
                Ok(evaluate(s, def, block, IrOp::Add, pty, base, Some(off)))
            } else {
                Ok(base)
            }
        }
        _ => Err(CompileError::type_error(
            "cannot take the address of this expression",
        )),
    }
}

/// Evaluate `*v`. Requires pointer type; yields an l-value of the pointee.
pub fn eval_deref(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    v: Var,
) -> CompileResult<Var> {
    let v = rvalue(s, def, block, v);
    if !s.types.is_pointer(v.ty) {
        return Err(CompileError::type_error(format!(
            "cannot dereference '{}'",
            s.types.display(v.ty)
        )));
    }
    let pointee = s.types.deref(v.ty);
    match v.kind {
        VarKind::Direct => Ok(Var {
            kind: VarKind::Deref,
            ty: pointee,
            offset: 0,
            lvalue: true,
            ..v
        }),
        VarKind::Address => {
            // Dereferencing an address-of computation lands back on the
            // object itself.
            Ok(Var {
                kind: VarKind::Direct,
                ty: pointee,
                lvalue: true,
                ..v
            })
        }
        _ => {
            // Pointer value not held in a named slot: materialize it first.
            let t = create_var(s, def, v.ty);
            let t = eval_assign(s, def, block, t, v)?;
            Ok(Var {
                kind: VarKind::Deref,
                ty: pointee,
                offset: 0,
                lvalue: true,
                ..t
            })
        }
    }
}

/// Simple assignment `target = v` (6.5.16.1).
///
/// The operand converts to the target type; the result is the assigned value
/// as an r-value of the target type.
pub fn eval_assign(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    target: Var,
    v: Var,
) -> CompileResult<Var> {
    if !target.lvalue {
        return Err(CompileError::type_error("assignment to non-lvalue"));
    }
    let v = if s.types.is_array(target.ty) {
        // Arrays are assignable only from string literals, in initializers.
        if !(v.kind == VarKind::Immediate && v.symbol.is_some() && s.types.is_array(v.ty)) {
            return Err(CompileError::type_error("array is not assignable"));
        }
        v
    } else if s.types.is_struct_or_union(target.ty) {
        let v = rvalue(s, def, block, v);
        if !s.types.equal(target.ty, v.ty) {
            return Err(CompileError::type_error(
                "assignment between incompatible aggregate types",
            ));
        }
        v
    } else {
        eval_cast(s, def, block, v, target.ty)?
    };
    def.emit(
        block,
        Op {
            target,
            op: IrOp::Assign,
            a: v,
            b: None,
        },
    );
    Ok(Var {
        lvalue: false,
        ..target
    })
}

/// Evaluate `v(...)` after parameters have been pushed.
pub fn eval_call(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    v: Var,
) -> CompileResult<Var> {
    let fty = if s.types.is_pointer(v.ty) {
        s.types.deref(v.ty)
    } else {
        v.ty
    };
    if !s.types.is_function(fty) {
        return Err(CompileError::type_error("called object is not a function"));
    }
    let ret = s.types.return_type(fty);
    let target = if s.types.is_void(ret) {
        Var::immediate(TypeTable::VOID, 0)
    } else {
        create_var(s, def, ret)
    };
    def.emit(
        block,
        Op {
            target,
            op: IrOp::Call,
            a: v,
            b: None,
        },
    );
    Ok(Var {
        lvalue: false,
        ..target
    })
}

/// Push a parameter in preparation of a call. Invoke in left-to-right order.
pub fn param(s: &mut Session, def: &mut Definition, block: BlockId, v: Var) {
    let v = rvalue(s, def, block, v);
    def.emit(
        block,
        Op {
            target: v,
            op: IrOp::Param,
            a: v,
            b: None,
        },
    );
}

/// Evaluate `return (expr)`, converting to the function return type.
pub fn eval_return(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    ret: TypeId,
    v: Var,
) -> CompileResult<()> {
    let v = if s.types.is_struct_or_union(ret) {
        let v = rvalue(s, def, block, v);
        if !s.types.equal(ret, v.ty) {
            return Err(CompileError::type_error(
                "returning incompatible aggregate type",
            ));
        }
        v
    } else {
        eval_cast(s, def, block, v, ret)?
    };
    def.block_mut(block).terminator = Terminator::Return(Some(v));
    Ok(())
}

/// Normalize a scalar to 0/1 of type int.
pub fn bool_of(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    v: Var,
) -> CompileResult<Var> {
    let zero = Var::immediate(TypeTable::INT, 0);
    let eq = eval_expr(s, def, block, IrOp::Eq, v, zero)?;
    let zero = Var::immediate(TypeTable::INT, 0);
    eval_expr(s, def, block, IrOp::Eq, eq, zero)
}

/// Whether a sub-graph from `top` to `end` is a single empty block whose
/// expression is a constant, i.e. safe to fold away.
fn is_pure_constant(def: &Definition, top: BlockId, end: BlockId) -> bool {
    top == end
        && def.block(end).code.is_empty()
        && def.block(end).terminator == Terminator::None
        && matches!(def.block(end).expr, Some(v) if v.is_constant())
}

/// Evaluate `left->expr || right->expr` with short-circuit CFG splicing.
/// Returns the block execution continues in; its expression is the 0/1
/// result of type int.
pub fn eval_logical_or(
    s: &mut Session,
    def: &mut Definition,
    left: BlockId,
    right_top: BlockId,
    right_end: BlockId,
) -> CompileResult<BlockId> {
    let lval = def.block(left).expr.unwrap();
    let lval = rvalue(s, def, left, lval);

    if lval.is_constant() && is_pure_constant(def, right_top, right_end) {
        let rval = def.block(right_end).expr.unwrap();
        let value = (lval.imm != 0 || rval.imm != 0) as i64;
        def.block_mut(left).expr = Some(Var::immediate(TypeTable::INT, value));
        return Ok(left);
    }

    let t = create_var(s, def, TypeTable::INT);
    let true_block = def.new_block(&mut s.syms);
    let merge = def.new_block(&mut s.syms);

    def.block_mut(left).terminator = Terminator::Branch(lval, true_block, right_top);

    let one = Var::immediate(TypeTable::INT, 1);
    eval_assign(s, def, true_block, t, one)?;
    def.block_mut(true_block).terminator = Terminator::Jump(merge);

    let rval = def.block(right_end).expr.unwrap();
    let rval = bool_of(s, def, right_end, rval)?;
    eval_assign(s, def, right_end, t, rval)?;
    def.block_mut(right_end).terminator = Terminator::Jump(merge);

    def.block_mut(merge).expr = Some(Var { lvalue: false, ..t });
    Ok(merge)
}

/// Evaluate `left->expr && right->expr`.
pub fn eval_logical_and(
    s: &mut Session,
    def: &mut Definition,
    left: BlockId,
    right_top: BlockId,
    right_end: BlockId,
) -> CompileResult<BlockId> {
    let lval = def.block(left).expr.unwrap();
    let lval = rvalue(s, def, left, lval);

    if lval.is_constant() && is_pure_constant(def, right_top, right_end) {
        let rval = def.block(right_end).expr.unwrap();
        let value = (lval.imm != 0 && rval.imm != 0) as i64;
        def.block_mut(left).expr = Some(Var::immediate(TypeTable::INT, value));
        return Ok(left);
    }

    let t = create_var(s, def, TypeTable::INT);
    let false_block = def.new_block(&mut s.syms);
    let merge = def.new_block(&mut s.syms);

    def.block_mut(left).terminator = Terminator::Branch(lval, right_top, false_block);

    let zero = Var::immediate(TypeTable::INT, 0);
    eval_assign(s, def, false_block, t, zero)?;
    def.block_mut(false_block).terminator = Terminator::Jump(merge);

    let rval = def.block(right_end).expr.unwrap();
    let rval = bool_of(s, def, right_end, rval)?;
    eval_assign(s, def, right_end, t, rval)?;
    def.block_mut(right_end).terminator = Terminator::Jump(merge);

    def.block_mut(merge).expr = Some(Var { lvalue: false, ..t });
    Ok(merge)
}

/// Evaluate `(cond) ? b : c` where the two operand sub-graphs each fall
/// through to a common merge block. Returns the merge block; its expression
/// is the converted result.
#[allow(clippy::too_many_arguments)]
pub fn eval_conditional(
    s: &mut Session,
    def: &mut Definition,
    cond_block: BlockId,
    then_top: BlockId,
    then_end: BlockId,
    else_top: BlockId,
    else_end: BlockId,
) -> CompileResult<BlockId> {
    let cond = def.block(cond_block).expr.unwrap();
    let cond = rvalue(s, def, cond_block, cond);

    let tval = def.block(then_end).expr.unwrap();
    let fval = def.block(else_end).expr.unwrap();

    if cond.is_constant()
        && is_pure_constant(def, then_top, then_end)
        && is_pure_constant(def, else_top, else_end)
    {
        let chosen = if cond.imm != 0 { tval } else { fval };
        def.block_mut(cond_block).expr = Some(chosen);
        return Ok(cond_block);
    }

    let ty = if s.types.is_arithmetic(tval.ty) && s.types.is_arithmetic(fval.ty) {
        s.types.usual_arithmetic_conversion(tval.ty, fval.ty)
    } else {
        tval.ty
    };

    let t = create_var(s, def, ty);
    let merge = def.new_block(&mut s.syms);

    def.block_mut(cond_block).terminator = Terminator::Branch(cond, then_top, else_top);

    eval_assign(s, def, then_end, t, tval)?;
    def.block_mut(then_end).terminator = Terminator::Jump(merge);
    eval_assign(s, def, else_end, t, fval)?;
    def.block_mut(else_end).terminator = Terminator::Jump(merge);

    def.block_mut(merge).expr = Some(Var { lvalue: false, ..t });
    Ok(merge)
}

/// Evaluate the `__builtin_va_start` builtin.
pub fn eval_va_start(def: &mut Definition, block: BlockId, ap: Var) -> CompileResult<Var> {
    if !ap.lvalue {
        return Err(CompileError::type_error("va_start requires an lvalue"));
    }
    def.emit(
        block,
        Op {
            target: ap,
            op: IrOp::VaStart,
            a: ap,
            b: None,
        },
    );
    Ok(Var::immediate(TypeTable::VOID, 0))
}

/// Evaluate the `__builtin_va_arg` builtin.
pub fn eval_va_arg(
    s: &mut Session,
    def: &mut Definition,
    block: BlockId,
    ap: Var,
    ty: TypeId,
) -> CompileResult<Var> {
    if !ap.lvalue {
        return Err(CompileError::type_error("va_arg requires an lvalue"));
    }
    Ok(evaluate(s, def, block, IrOp::VaArg, ty, ap, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtab::{SymbolKind, Space};

    fn setup() -> (Session, Definition) {
        let mut s = Session::new();
        let f = s.syms.add(
            Space::Ident,
            "f",
            TypeTable::INT,
            SymbolKind::Definition,
            Linkage::Extern,
        );
        let def = Definition::new(f, &mut s.syms);
        (s, def)
    }

    #[test]
    fn test_constant_folding_arithmetic() {
        let (mut s, mut def) = setup();
        let b = def.body;
        let two = Var::immediate(TypeTable::INT, 2);
        let three = Var::immediate(TypeTable::INT, 3);
        let r = eval_expr(&mut s, &mut def, b, IrOp::Add, two, three).unwrap();
        assert!(r.is_constant());
        assert_eq!(r.imm, 5);
        assert_eq!(r.ty, TypeTable::INT);
        // No IR was emitted.
        assert!(def.block(b).code.is_empty());
    }

    #[test]
    fn test_folding_post_conversion_type() {
        let (mut s, mut def) = setup();
        let b = def.body;
        let c = Var::immediate(TypeTable::CHAR, 100);
        let d = Var::immediate(TypeTable::CHAR, 100);
        // char + char happens at int width; no wraparound at 8 bits.
        let r = eval_expr(&mut s, &mut def, b, IrOp::Add, c, d).unwrap();
        assert_eq!(r.imm, 200);
        assert_eq!(r.ty, TypeTable::INT);
    }

    #[test]
    fn test_fold_division_by_zero_is_error() {
        let (mut s, mut def) = setup();
        let b = def.body;
        let one = Var::immediate(TypeTable::INT, 1);
        let zero = Var::immediate(TypeTable::INT, 0);
        assert!(eval_expr(&mut s, &mut def, b, IrOp::Div, one, zero).is_err());
    }

    #[test]
    fn test_unsigned_comparison_folding() {
        let (mut s, mut def) = setup();
        let b = def.body;
        let big = Var::immediate(TypeTable::UINT, -1); // 0xFFFFFFFF
        let one = Var::immediate(TypeTable::UINT, 1);
        let r = eval_expr(&mut s, &mut def, b, IrOp::Gt, big, one).unwrap();
        assert_eq!(r.imm, 1);
    }

    #[test]
    fn test_emitted_op_for_variable_operand() {
        let (mut s, mut def) = setup();
        let b = def.body;
        let x = create_var(&mut s, &mut def, TypeTable::INT);
        let one = Var::immediate(TypeTable::INT, 1);
        let r = eval_expr(&mut s, &mut def, b, IrOp::Add, x, one).unwrap();
        assert!(!r.is_immediate());
        assert_eq!(def.block(b).code.len(), 1);
        assert_eq!(def.block(b).code[0].op, IrOp::Add);
    }

    #[test]
    fn test_assignment_converts_and_returns_rvalue() {
        let (mut s, mut def) = setup();
        let b = def.body;
        let c = create_var(&mut s, &mut def, TypeTable::CHAR);
        let big = Var::immediate(TypeTable::INT, 0x1ff);
        let r = eval_assign(&mut s, &mut def, b, c, big).unwrap();
        assert!(!r.lvalue);
        assert_eq!(r.ty, TypeTable::CHAR);
        let op = def.block(b).code[0];
        assert_eq!(op.op, IrOp::Assign);
        // Truncated to char width before the store.
        assert_eq!(op.a.imm, -1);
    }

    #[test]
    fn test_addr_deref_roundtrip() {
        let (mut s, mut def) = setup();
        let b = def.body;
        let x = create_var(&mut s, &mut def, TypeTable::INT);
        let p = eval_addr(&mut s, &mut def, b, x).unwrap();
        assert!(s.types.is_pointer(p.ty));
        assert!(!p.lvalue);
        let back = eval_deref(&mut s, &mut def, b, p).unwrap();
        assert!(back.lvalue);
        assert_eq!(back.ty, TypeTable::INT);
    }

    #[test]
    fn test_array_decay() {
        let (mut s, mut def) = setup();
        let b = def.body;
        let arr_ty = s.types.array_of(TypeTable::INT, 4);
        let a = create_var(&mut s, &mut def, arr_ty);
        let decayed = rvalue(&mut s, &mut def, b, a);
        assert_eq!(decayed.kind, VarKind::Address);
        assert!(s.types.is_pointer(decayed.ty));
        assert_eq!(s.types.deref(decayed.ty), TypeTable::INT);
    }

    #[test]
    fn test_pointer_arithmetic_scales() {
        let (mut s, mut def) = setup();
        let b = def.body;
        let pty = s.types.pointer_to(TypeTable::INT);
        let p = create_var(&mut s, &mut def, pty);
        let two = Var::immediate(TypeTable::INT, 2);
        let r = eval_expr(&mut s, &mut def, b, IrOp::Add, p, two).unwrap();
        assert_eq!(r.ty, pty);
        // The scale multiply folded; a single add op remains.
        let add = def.block(b).code.last().unwrap();
        assert_eq!(add.op, IrOp::Add);
        assert_eq!(add.b.unwrap().imm, 8);
    }

    #[test]
    fn test_logical_or_constant_folds() {
        let (mut s, mut def) = setup();
        let left = def.body;
        def.block_mut(left).expr = Some(Var::immediate(TypeTable::INT, 0));
        let right = def.new_block(&mut s.syms);
        def.block_mut(right).expr = Some(Var::immediate(TypeTable::INT, 7));
        let out = eval_logical_or(&mut s, &mut def, left, right, right).unwrap();
        assert_eq!(out, left);
        assert_eq!(def.block(out).expr.unwrap().imm, 1);
    }

    #[test]
    fn test_logical_and_splices_cfg() {
        let (mut s, mut def) = setup();
        let left = def.body;
        let x = create_var(&mut s, &mut def, TypeTable::INT);
        def.block_mut(left).expr = Some(x);
        let right = def.new_block(&mut s.syms);
        def.block_mut(right).expr = Some(Var::immediate(TypeTable::INT, 1));
        let merge = eval_logical_and(&mut s, &mut def, left, right, right).unwrap();
        assert_ne!(merge, left);
        match def.block(left).terminator {
            Terminator::Branch(_, t, f) => {
                assert_eq!(t, right);
                assert_ne!(f, right);
            }
            _ => panic!("expected branch terminator"),
        }
        let result = def.block(merge).expr.unwrap();
        assert_eq!(result.ty, TypeTable::INT);
    }
}
