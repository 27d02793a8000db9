//! Expression grammar.
//!
//! Full C89 precedence ladder from the comma operator down to primary
//! expressions. Each rule takes the current block and returns the block
//! execution continues in, leaving the value as that block's expression.

use super::{p, Parser};
use crate::error::{CompileError, CompileResult};
use crate::eval;
use crate::ir::{BlockId, Definition, IrOp, Var};
use crate::lexer::TokenKind;
use crate::symtab::{Space, SymbolKind};
use crate::types::{TypeId, TypeTable};

impl Parser {
    fn expr_of(&self, def: &Definition, block: BlockId) -> Var {
        def.block(block).expr.expect("block carries no expression")
    }

    fn set_expr(&self, def: &mut Definition, block: BlockId, v: Var) {
        def.block_mut(block).expr = Some(v);
    }

    /// expression: assignment-expression (',' assignment-expression)*
    pub(crate) fn expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.assignment_expression(def, block)?;
        while self.ts.try_consume(p(',')) {
            block = self.assignment_expression(def, block)?;
        }
        Ok(block)
    }

    /// assignment-expression, including the compound assignment operators
    /// which expand to the corresponding binary operation plus a store.
    pub(crate) fn assignment_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let block = self.conditional_expression(def, block)?;
        let op = match self.ts.peek().kind {
            TokenKind::Punct('=') => None,
            TokenKind::MulAssign => Some(IrOp::Mul),
            TokenKind::DivAssign => Some(IrOp::Div),
            TokenKind::ModAssign => Some(IrOp::Mod),
            TokenKind::AddAssign => Some(IrOp::Add),
            TokenKind::SubAssign => Some(IrOp::Sub),
            TokenKind::LeftShiftAssign => Some(IrOp::Shl),
            TokenKind::RightShiftAssign => Some(IrOp::Shr),
            TokenKind::AndAssign => Some(IrOp::And),
            TokenKind::XorAssign => Some(IrOp::Xor),
            TokenKind::OrAssign => Some(IrOp::Or),
            _ => return Ok(block),
        };
        let loc = self.here();
        self.ts.next();

        let target = self.expr_of(def, block);
        if !target.lvalue {
            return Err(CompileError::semantic("assignment to non-lvalue", loc));
        }
        let block = self.assignment_expression(def, block)?;
        let mut value = self.expr_of(def, block);
        if let Some(op) = op {
            value = eval::eval_expr(&mut self.sess, def, block, op, target, value)
                .map_err(|e| e.at(loc))?;
        }
        let res = eval::eval_assign(&mut self.sess, def, block, target, value)
            .map_err(|e| e.at(loc))?;
        self.set_expr(def, block, res);
        Ok(block)
    }

    /// conditional-expression: logical-or ('?' expression ':' conditional)?
    pub(crate) fn conditional_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let cond_block = self.logical_or_expression(def, block)?;
        if !self.ts.try_consume(p('?')) {
            return Ok(cond_block);
        }
        let loc = self.here();
        let then_top = def.new_block(&mut self.sess.syms);
        let then_end = self.expression(def, then_top)?;
        self.ts.consume(p(':'))?;
        let else_top = def.new_block(&mut self.sess.syms);
        let else_end = self.conditional_expression(def, else_top)?;
        eval::eval_conditional(
            &mut self.sess,
            def,
            cond_block,
            then_top,
            then_end,
            else_top,
            else_end,
        )
        .map_err(|e| e.at(loc))
    }

    fn logical_or_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.logical_and_expression(def, block)?;
        while self.ts.try_consume(TokenKind::LogicalOr) {
            let loc = self.here();
            let right_top = def.new_block(&mut self.sess.syms);
            let right_end = self.logical_and_expression(def, right_top)?;
            block = eval::eval_logical_or(&mut self.sess, def, block, right_top, right_end)
                .map_err(|e| e.at(loc))?;
        }
        Ok(block)
    }

    fn logical_and_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.inclusive_or_expression(def, block)?;
        while self.ts.try_consume(TokenKind::LogicalAnd) {
            let loc = self.here();
            let right_top = def.new_block(&mut self.sess.syms);
            let right_end = self.inclusive_or_expression(def, right_top)?;
            block = eval::eval_logical_and(&mut self.sess, def, block, right_top, right_end)
                .map_err(|e| e.at(loc))?;
        }
        Ok(block)
    }

    fn binary(
        &mut self,
        def: &mut Definition,
        block: BlockId,
        op: IrOp,
        parse_rhs: fn(&mut Parser, &mut Definition, BlockId) -> CompileResult<BlockId>,
    ) -> CompileResult<BlockId> {
        let loc = self.here();
        let l = self.expr_of(def, block);
        let block = parse_rhs(self, def, block)?;
        let r = self.expr_of(def, block);
        let v = eval::eval_expr(&mut self.sess, def, block, op, l, r).map_err(|e| e.at(loc))?;
        self.set_expr(def, block, v);
        Ok(block)
    }

    fn inclusive_or_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.exclusive_or_expression(def, block)?;
        while self.ts.peek().kind == p('|') {
            self.ts.next();
            block = self.binary(def, block, IrOp::Or, Parser::exclusive_or_expression)?;
        }
        Ok(block)
    }

    fn exclusive_or_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.and_expression(def, block)?;
        while self.ts.peek().kind == p('^') {
            self.ts.next();
            block = self.binary(def, block, IrOp::Xor, Parser::and_expression)?;
        }
        Ok(block)
    }

    fn and_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.equality_expression(def, block)?;
        while self.ts.peek().kind == p('&') {
            self.ts.next();
            block = self.binary(def, block, IrOp::And, Parser::equality_expression)?;
        }
        Ok(block)
    }

    fn equality_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.relational_expression(def, block)?;
        loop {
            let negate = match self.ts.peek().kind {
                TokenKind::EqualEqual => false,
                TokenKind::NotEqual => true,
                _ => break,
            };
            let loc = self.here();
            self.ts.next();
            let l = self.expr_of(def, block);
            block = self.relational_expression(def, block)?;
            let r = self.expr_of(def, block);
            let mut v = eval::eval_expr(&mut self.sess, def, block, IrOp::Eq, l, r)
                .map_err(|e| e.at(loc))?;
            if negate {
                let zero = Var::immediate(TypeTable::INT, 0);
                v = eval::eval_expr(&mut self.sess, def, block, IrOp::Eq, v, zero)
                    .map_err(|e| e.at(loc))?;
            }
            self.set_expr(def, block, v);
        }
        Ok(block)
    }

    fn relational_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.shift_expression(def, block)?;
        loop {
            // Normalized to Gt/Ge by swapping operands where needed.
            let (op, swap) = match self.ts.peek().kind {
                TokenKind::Punct('<') => (IrOp::Gt, true),
                TokenKind::Punct('>') => (IrOp::Gt, false),
                TokenKind::LessEqual => (IrOp::Ge, true),
                TokenKind::GreaterEqual => (IrOp::Ge, false),
                _ => break,
            };
            let loc = self.here();
            self.ts.next();
            let l = self.expr_of(def, block);
            block = self.shift_expression(def, block)?;
            let r = self.expr_of(def, block);
            let (a, b) = if swap { (r, l) } else { (l, r) };
            let v = eval::eval_expr(&mut self.sess, def, block, op, a, b)
                .map_err(|e| e.at(loc))?;
            self.set_expr(def, block, v);
        }
        Ok(block)
    }

    fn shift_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.additive_expression(def, block)?;
        loop {
            let op = match self.ts.peek().kind {
                TokenKind::LeftShift => IrOp::Shl,
                TokenKind::RightShift => IrOp::Shr,
                _ => break,
            };
            self.ts.next();
            block = self.binary(def, block, op, Parser::additive_expression)?;
        }
        Ok(block)
    }

    fn additive_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.multiplicative_expression(def, block)?;
        loop {
            let op = match self.ts.peek().kind {
                TokenKind::Punct('+') => IrOp::Add,
                TokenKind::Punct('-') => IrOp::Sub,
                _ => break,
            };
            self.ts.next();
            block = self.binary(def, block, op, Parser::multiplicative_expression)?;
        }
        Ok(block)
    }

    fn multiplicative_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.cast_expression(def, block)?;
        loop {
            let op = match self.ts.peek().kind {
                TokenKind::Punct('*') => IrOp::Mul,
                TokenKind::Punct('/') => IrOp::Div,
                TokenKind::Punct('%') => IrOp::Mod,
                _ => break,
            };
            self.ts.next();
            block = self.binary(def, block, op, Parser::cast_expression)?;
        }
        Ok(block)
    }

    fn cast_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        if self.ts.peek().kind == p('(') && self.starts_type_name(1) {
            let loc = self.here();
            self.ts.consume(p('('))?;
            let ty = self.type_name()?;
            self.ts.consume(p(')'))?;
            let block = self.cast_expression(def, block)?;
            let v = self.expr_of(def, block);
            let v = eval::eval_cast(&mut self.sess, def, block, v, ty).map_err(|e| e.at(loc))?;
            self.set_expr(def, block, v);
            return Ok(block);
        }
        self.unary_expression(def, block)
    }

    fn unary_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let loc = self.here();
        match self.ts.peek().kind {
            TokenKind::Punct('&') => {
                self.ts.next();
                let block = self.cast_expression(def, block)?;
                let v = self.expr_of(def, block);
                let v = eval::eval_addr(&mut self.sess, def, block, v).map_err(|e| e.at(loc))?;
                self.set_expr(def, block, v);
                Ok(block)
            }
            TokenKind::Punct('*') => {
                self.ts.next();
                let block = self.cast_expression(def, block)?;
                let v = self.expr_of(def, block);
                let v = eval::eval_deref(&mut self.sess, def, block, v).map_err(|e| e.at(loc))?;
                self.set_expr(def, block, v);
                Ok(block)
            }
            TokenKind::Punct('+') => {
                self.ts.next();
                let block = self.cast_expression(def, block)?;
                let v = self.expr_of(def, block);
                let v = eval::rvalue(&mut self.sess, def, block, v);
                if !self.sess.types.is_integer(v.ty) {
                    return Err(CompileError::semantic("unary '+' requires an integer", loc));
                }
                let ty = self.sess.types.promote_integer(v.ty);
                let v = eval::eval_cast(&mut self.sess, def, block, v, ty)
                    .map_err(|e| e.at(loc))?;
                self.set_expr(def, block, v);
                Ok(block)
            }
            TokenKind::Punct('-') => {
                self.ts.next();
                let block = self.cast_expression(def, block)?;
                let v = self.expr_of(def, block);
                let zero = Var::immediate(TypeTable::INT, 0);
                let v = eval::eval_expr(&mut self.sess, def, block, IrOp::Sub, zero, v)
                    .map_err(|e| e.at(loc))?;
                self.set_expr(def, block, v);
                Ok(block)
            }
            TokenKind::Punct('~') => {
                self.ts.next();
                let block = self.cast_expression(def, block)?;
                let v = self.expr_of(def, block);
                let v = eval::eval_not(&mut self.sess, def, block, v).map_err(|e| e.at(loc))?;
                self.set_expr(def, block, v);
                Ok(block)
            }
            TokenKind::Punct('!') => {
                self.ts.next();
                let block = self.cast_expression(def, block)?;
                let v = self.expr_of(def, block);
                let zero = Var::immediate(TypeTable::INT, 0);
                let v = eval::eval_expr(&mut self.sess, def, block, IrOp::Eq, v, zero)
                    .map_err(|e| e.at(loc))?;
                self.set_expr(def, block, v);
                Ok(block)
            }
            TokenKind::Increment | TokenKind::Decrement => {
                let op = if self.ts.peek().kind == TokenKind::Increment {
                    IrOp::Add
                } else {
                    IrOp::Sub
                };
                self.ts.next();
                let block = self.unary_expression(def, block)?;
                let target = self.expr_of(def, block);
                let one = Var::immediate(TypeTable::INT, 1);
                let v = eval::eval_expr(&mut self.sess, def, block, op, target, one)
                    .map_err(|e| e.at(loc))?;
                let v = eval::eval_assign(&mut self.sess, def, block, target, v)
                    .map_err(|e| e.at(loc))?;
                self.set_expr(def, block, v);
                Ok(block)
            }
            TokenKind::Sizeof => {
                self.ts.next();
                let ty = if self.ts.peek().kind == p('(') && self.starts_type_name(1) {
                    self.ts.consume(p('('))?;
                    let ty = self.type_name()?;
                    self.ts.consume(p(')'))?;
                    ty
                } else {
                    // The operand is parsed for its type only; a sandbox
                    // definition swallows any emitted code.
                    let scratch = self.sess.syms.create_tmp(TypeTable::INT);
                    let mut sandbox = Definition::new(scratch, &mut self.sess.syms);
                    let body = sandbox.body;
                    let end = self.unary_expression(&mut sandbox, body)?;
                    self.expr_of(&sandbox, end).ty
                };
                if self.sess.types.size_of(ty) == 0 {
                    return Err(CompileError::semantic(
                        "sizeof applied to an incomplete type",
                        loc,
                    ));
                }
                let size = self.sess.types.size_of(ty);
                self.set_expr(
                    def,
                    block,
                    Var::immediate(TypeTable::ULONG, i64::from(size)),
                );
                Ok(block)
            }
            _ => self.postfix_expression(def, block),
        }
    }

    fn postfix_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let mut block = self.primary_expression(def, block)?;
        loop {
            let loc = self.here();
            match self.ts.peek().kind {
                TokenKind::Punct('[') => {
                    self.ts.next();
                    let base = self.expr_of(def, block);
                    block = self.expression(def, block)?;
                    let index = self.expr_of(def, block);
                    self.ts.consume(p(']'))?;
                    let ptr =
                        eval::eval_expr(&mut self.sess, def, block, IrOp::Add, base, index)
                            .map_err(|e| e.at(loc))?;
                    let v = eval::eval_deref(&mut self.sess, def, block, ptr)
                        .map_err(|e| e.at(loc))?;
                    self.set_expr(def, block, v);
                }
                TokenKind::Punct('(') => {
                    block = self.call_arguments(def, block)?;
                }
                TokenKind::Punct('.') => {
                    self.ts.next();
                    let v = self.expr_of(def, block);
                    let name = self.ts.consume(TokenKind::Identifier)?.text;
                    let v = self.member_access(v, &name, loc)?;
                    self.set_expr(def, block, v);
                }
                TokenKind::Arrow => {
                    self.ts.next();
                    let v = self.expr_of(def, block);
                    let v = eval::eval_deref(&mut self.sess, def, block, v)
                        .map_err(|e| e.at(loc))?;
                    let name = self.ts.consume(TokenKind::Identifier)?.text;
                    let v = self.member_access(v, &name, loc)?;
                    self.set_expr(def, block, v);
                }
                TokenKind::Increment | TokenKind::Decrement => {
                    let op = if self.ts.peek().kind == TokenKind::Increment {
                        IrOp::Add
                    } else {
                        IrOp::Sub
                    };
                    self.ts.next();
                    let target = self.expr_of(def, block);
                    if !target.lvalue {
                        return Err(CompileError::semantic(
                            "increment of non-lvalue",
                            loc,
                        ));
                    }
                    // Save the old value, then store the stepped one.
                    let old = eval::create_var(&mut self.sess, def, target.ty);
                    let old = eval::eval_assign(&mut self.sess, def, block, old, target)
                        .map_err(|e| e.at(loc))?;
                    let one = Var::immediate(TypeTable::INT, 1);
                    let stepped =
                        eval::eval_expr(&mut self.sess, def, block, op, target, one)
                            .map_err(|e| e.at(loc))?;
                    eval::eval_assign(&mut self.sess, def, block, target, stepped)
                        .map_err(|e| e.at(loc))?;
                    self.set_expr(def, block, old);
                }
                _ => break,
            }
        }
        Ok(block)
    }

    fn member_access(
        &mut self,
        v: Var,
        name: &str,
        loc: crate::lexer::SourceLocation,
    ) -> CompileResult<Var> {
        if !self.sess.types.is_struct_or_union(v.ty) {
            return Err(CompileError::semantic(
                "member access on non-aggregate type",
                loc,
            ));
        }
        let member = self
            .sess
            .types
            .find_member(v.ty, name)
            .cloned()
            .ok_or_else(|| {
                CompileError::semantic(
                    format!(
                        "no member named '{}' in '{}'",
                        name,
                        self.sess.types.display(v.ty)
                    ),
                    loc,
                )
            })?;
        Ok(Var {
            ty: member.ty,
            offset: v.offset + member.offset as i32,
            lvalue: true,
            ..v
        })
    }

    /// Parse `(args)` after a function designator, pushing parameters left
    /// to right and materializing the call.
    fn call_arguments(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let loc = self.here();
        let func = self.expr_of(def, block);
        let fty = if self.sess.types.is_pointer(func.ty) {
            self.sess.types.deref(func.ty)
        } else {
            func.ty
        };
        if !self.sess.types.is_function(fty) {
            return Err(CompileError::semantic(
                "called object is not a function",
                loc,
            ));
        }
        let nparams = self.sess.types.nmembers(fty);
        let vararg = self.sess.types.is_vararg(fty);

        self.ts.consume(p('('))?;
        let mut block = block;
        let mut n = 0usize;
        if self.ts.peek().kind != p(')') {
            loop {
                let arg_loc = self.here();
                block = self.assignment_expression(def, block)?;
                let mut arg = self.expr_of(def, block);
                if n < nparams {
                    let pty = self.sess.types.member(fty, n).ty;
                    if !self.sess.types.is_struct_or_union(pty) {
                        arg = eval::eval_cast(&mut self.sess, def, block, arg, pty)
                            .map_err(|e| e.at(arg_loc))?;
                    }
                } else if !vararg && nparams > 0 {
                    return Err(CompileError::semantic(
                        "too many arguments in function call",
                        arg_loc,
                    ));
                } else if self.sess.types.is_integer(arg.ty) {
                    // Default argument promotion for unprototyped tails.
                    let pty = self.sess.types.promote_integer(arg.ty);
                    arg = eval::eval_cast(&mut self.sess, def, block, arg, pty)
                        .map_err(|e| e.at(arg_loc))?;
                }
                eval::param(&mut self.sess, def, block, arg);
                n += 1;
                if !self.ts.try_consume(p(',')) {
                    break;
                }
            }
        }
        self.ts.consume(p(')'))?;
        if n < nparams {
            return Err(CompileError::semantic(
                "too few arguments in function call",
                loc,
            ));
        }
        let v = eval::eval_call(&mut self.sess, def, block, func).map_err(|e| e.at(loc))?;
        self.set_expr(def, block, v);
        Ok(block)
    }

    fn primary_expression(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let tok = self.ts.peek().clone();
        match tok.kind {
            TokenKind::Identifier => {
                // The va builtins have their own call syntax.
                if tok.text == "__builtin_va_start" {
                    return self.builtin_va_start(def, block);
                }
                if tok.text == "__builtin_va_arg" {
                    return self.builtin_va_arg(def, block);
                }
                self.ts.next();
                let sym_id = self
                    .sess
                    .syms
                    .lookup(Space::Ident, &tok.text)
                    .ok_or_else(|| {
                        CompileError::semantic(
                            format!("use of undeclared identifier '{}'", tok.text),
                            tok.loc,
                        )
                    })?;
                let sym = self.sess.syms.get(sym_id);
                let v = match sym.kind {
                    SymbolKind::EnumValue => Var::immediate(TypeTable::INT, sym.enum_value),
                    SymbolKind::StringValue => Var::immediate_symbol(sym.ty, sym_id),
                    SymbolKind::Typedef => {
                        return Err(CompileError::semantic(
                            format!("unexpected type name '{}'", tok.text),
                            tok.loc,
                        ))
                    }
                    _ => Var::direct(sym_id, sym.ty),
                };
                self.set_expr(def, block, v);
                Ok(block)
            }
            TokenKind::Number => {
                self.ts.next();
                let ty = match (tok.is_long, tok.is_unsigned) {
                    (false, false) => TypeTable::INT,
                    (false, true) => TypeTable::UINT,
                    (true, false) => TypeTable::LONG,
                    (true, true) => TypeTable::ULONG,
                };
                self.set_expr(def, block, Var::immediate(ty, tok.value));
                Ok(block)
            }
            TokenKind::String => {
                self.ts.next();
                let v = self.string_value(&tok.text);
                self.set_expr(def, block, v);
                Ok(block)
            }
            TokenKind::Punct('(') => {
                self.ts.next();
                let block = self.expression(def, block)?;
                self.ts.consume(p(')'))?;
                Ok(block)
            }
            _ => Err(CompileError::syntax(
                format!("expected expression, found {}", tok.kind),
                tok.loc,
            )),
        }
    }

    /// Anonymous string-value symbol of type `char[len + 1]`.
    pub(crate) fn string_value(&mut self, text: &str) -> Var {
        let ty = self
            .sess
            .types
            .array_of(TypeTable::CHAR, text.len() as u32 + 1);
        let sym = self.sess.syms.create_string(text, ty);
        Var::immediate_symbol(ty, sym)
    }

    fn builtin_va_start(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let loc = self.here();
        self.ts.consume(TokenKind::Identifier)?;
        self.ts.consume(p('('))?;
        let block = self.assignment_expression(def, block)?;
        let ap = self.expr_of(def, block);
        // The second argument names the last declared parameter; the layout
        // is decided by classification, so it is parsed and dropped.
        if self.ts.try_consume(p(',')) {
            self.ts.consume(TokenKind::Identifier)?;
        }
        self.ts.consume(p(')'))?;
        let v = eval::eval_va_start(def, block, ap).map_err(|e| e.at(loc))?;
        self.set_expr(def, block, v);
        Ok(block)
    }

    fn builtin_va_arg(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let loc = self.here();
        self.ts.consume(TokenKind::Identifier)?;
        self.ts.consume(p('('))?;
        let block = self.assignment_expression(def, block)?;
        let ap = self.expr_of(def, block);
        self.ts.consume(p(','))?;
        let ty = self.type_name()?;
        self.ts.consume(p(')'))?;
        let v = eval::eval_va_arg(&mut self.sess, def, block, ap, ty).map_err(|e| e.at(loc))?;
        self.set_expr(def, block, v);
        Ok(block)
    }

    /// type-name: specifier-qualifier-list abstract-declarator?
    pub(crate) fn type_name(&mut self) -> CompileResult<TypeId> {
        let spec = self.declaration_specifiers(false)?;
        let (ty, name) = self.declarator(Some(spec.ty))?;
        if let Some(name) = name {
            return Err(self.err(format!("unexpected identifier '{}' in type name", name)));
        }
        ty.ok_or_else(|| self.err("expected type name"))
    }
}
