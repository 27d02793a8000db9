//! Statement parsing, realized as CFG edges on the current definition.
//!
//! `break` and `continue` targets live on two scoped stacks pushed and
//! popped as loops and switches nest. `switch` collects its `case` and
//! `default` labels while the body parses, then builds an equality-test
//! dispatch chain at the switch head. Forward `goto`s are recorded and
//! patched once the function body is complete.

use super::{p, Parser, SwitchContext};
use crate::error::{CompileError, CompileResult};
use crate::eval;
use crate::ir::{BlockId, Definition, IrOp, Terminator, Var};
use crate::lexer::TokenKind;
use crate::symtab::Space;

impl Parser {
    /// compound-statement: '{' (declaration | statement)* '}'
    pub(crate) fn compound_statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        self.ts.consume(p('{'))?;
        self.sess.syms.push_scope(Space::Ident);
        self.sess.syms.push_scope(Space::Tag);
        let mut block = block;
        while self.ts.peek().kind != p('}') {
            block = self.statement_or_declaration(def, block)?;
        }
        self.ts.consume(p('}'))?;
        self.sess.syms.pop_scope(Space::Tag);
        self.sess.syms.pop_scope(Space::Ident);
        Ok(block)
    }

    fn statement_or_declaration(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        if self.starts_declaration() {
            self.local_declaration(def, block)
        } else {
            self.statement(def, block)
        }
    }

    pub(crate) fn statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        match self.ts.peek().kind {
            TokenKind::Punct('{') => self.compound_statement(def, block),
            TokenKind::If => self.if_statement(def, block),
            TokenKind::While => self.while_statement(def, block),
            TokenKind::Do => self.do_statement(def, block),
            TokenKind::For => self.for_statement(def, block),
            TokenKind::Switch => self.switch_statement(def, block),
            TokenKind::Case => self.case_label(def, block),
            TokenKind::Default => self.default_label(def, block),
            TokenKind::Break => self.break_statement(def, block),
            TokenKind::Continue => self.continue_statement(def, block),
            TokenKind::Return => self.return_statement(def, block),
            TokenKind::Goto => self.goto_statement(def, block),
            TokenKind::Punct(';') => {
                self.ts.next();
                Ok(block)
            }
            TokenKind::Identifier if self.ts.nth(1).kind == p(':') => {
                self.labeled_statement(def, block)
            }
            _ => {
                let block = self.expression(def, block)?;
                self.ts.consume(p(';'))?;
                Ok(block)
            }
        }
    }

    /// Parse a parenthesized controlling expression, returning the end block
    /// and the condition converted to an r-value.
    fn condition(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<(BlockId, Var)> {
        self.ts.consume(p('('))?;
        let end = self.expression(def, block)?;
        self.ts.consume(p(')'))?;
        let v = def.block(end).expr.expect("condition expression");
        let v = eval::rvalue(&mut self.sess, def, end, v);
        Ok((end, v))
    }

    fn if_statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        self.ts.consume(TokenKind::If)?;
        let (cond_block, cond) = self.condition(def, block)?;

        let then_top = def.new_block(&mut self.sess.syms);
        let then_end = self.statement(def, then_top)?;

        if self.ts.try_consume(TokenKind::Else) {
            let else_top = def.new_block(&mut self.sess.syms);
            let else_end = self.statement(def, else_top)?;
            let merge = def.new_block(&mut self.sess.syms);
            def.block_mut(cond_block).terminator =
                Terminator::Branch(cond, then_top, else_top);
            def.seal(then_end, merge);
            def.seal(else_end, merge);
            Ok(merge)
        } else {
            let merge = def.new_block(&mut self.sess.syms);
            def.block_mut(cond_block).terminator = Terminator::Branch(cond, then_top, merge);
            def.seal(then_end, merge);
            Ok(merge)
        }
    }

    fn while_statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        self.ts.consume(TokenKind::While)?;
        let head = def.new_block(&mut self.sess.syms);
        def.seal(block, head);
        let (cond_end, cond) = self.condition(def, head)?;

        let body_top = def.new_block(&mut self.sess.syms);
        let merge = def.new_block(&mut self.sess.syms);
        def.block_mut(cond_end).terminator = Terminator::Branch(cond, body_top, merge);

        self.break_targets.push(merge);
        self.continue_targets.push(head);
        let body_end = self.statement(def, body_top)?;
        self.continue_targets.pop();
        self.break_targets.pop();

        def.seal(body_end, head);
        Ok(merge)
    }

    fn do_statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        self.ts.consume(TokenKind::Do)?;
        let body_top = def.new_block(&mut self.sess.syms);
        def.seal(block, body_top);
        let cond_top = def.new_block(&mut self.sess.syms);
        let merge = def.new_block(&mut self.sess.syms);

        self.break_targets.push(merge);
        self.continue_targets.push(cond_top);
        let body_end = self.statement(def, body_top)?;
        self.continue_targets.pop();
        self.break_targets.pop();
        def.seal(body_end, cond_top);

        self.ts.consume(TokenKind::While)?;
        let (cond_end, cond) = self.condition(def, cond_top)?;
        self.ts.consume(p(';'))?;
        def.block_mut(cond_end).terminator = Terminator::Branch(cond, body_top, merge);
        Ok(merge)
    }

    fn for_statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        self.ts.consume(TokenKind::For)?;
        self.ts.consume(p('('))?;

        let mut block = block;
        if self.ts.peek().kind != p(';') {
            block = self.expression(def, block)?;
        }
        self.ts.consume(p(';'))?;

        let head = def.new_block(&mut self.sess.syms);
        def.seal(block, head);

        let body_top = def.new_block(&mut self.sess.syms);
        let merge = def.new_block(&mut self.sess.syms);
        if self.ts.peek().kind != p(';') {
            let cond_end = self.expression(def, head)?;
            let cond = def.block(cond_end).expr.expect("for condition");
            let cond = eval::rvalue(&mut self.sess, def, cond_end, cond);
            def.block_mut(cond_end).terminator = Terminator::Branch(cond, body_top, merge);
        } else {
            def.seal(head, body_top);
        }
        self.ts.consume(p(';'))?;

        let post_top = def.new_block(&mut self.sess.syms);
        let post_end = if self.ts.peek().kind != p(')') {
            self.expression(def, post_top)?
        } else {
            post_top
        };
        self.ts.consume(p(')'))?;
        def.seal(post_end, head);

        self.break_targets.push(merge);
        self.continue_targets.push(post_top);
        let body_end = self.statement(def, body_top)?;
        self.continue_targets.pop();
        self.break_targets.pop();

        def.seal(body_end, post_top);
        Ok(merge)
    }

    fn switch_statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        self.ts.consume(TokenKind::Switch)?;
        let loc = self.here();
        let (head, value) = self.condition(def, block)?;
        if !self.sess.types.is_integer(value.ty) {
            return Err(CompileError::semantic(
                "switch expression must have integer type",
                loc,
            ));
        }

        let merge = def.new_block(&mut self.sess.syms);
        self.switches.push(SwitchContext {
            value,
            cases: Vec::new(),
            default: None,
        });
        self.break_targets.push(merge);

        // Statements ahead of the first case label are unreachable; the
        // dispatch chain never targets the body entry.
        let body_top = def.new_block(&mut self.sess.syms);
        let body_end = self.statement(def, body_top)?;

        self.break_targets.pop();
        let ctx = self.switches.pop().expect("switch context");
        def.seal(body_end, merge);

        // Dispatch: a sequence of equality tests in case order.
        let mut cur = head;
        for (case_value, target) in &ctx.cases {
            let case = Var::immediate(value.ty, *case_value);
            let cond = eval::eval_expr(&mut self.sess, def, cur, IrOp::Eq, value, case)
                .map_err(|e| e.at(loc))?;
            let next_test = def.new_block(&mut self.sess.syms);
            def.block_mut(cur).terminator = Terminator::Branch(cond, *target, next_test);
            cur = next_test;
        }
        def.seal(cur, ctx.default.unwrap_or(merge));
        Ok(merge)
    }

    fn case_label(&mut self, def: &mut Definition, block: BlockId) -> CompileResult<BlockId> {
        let loc = self.here();
        self.ts.consume(TokenKind::Case)?;
        let v = self.constant_expression()?;
        if !self.sess.types.is_integer(v.ty) {
            return Err(CompileError::semantic(
                "case label must be an integer constant",
                loc,
            ));
        }
        self.ts.consume(p(':'))?;
        if self.switches.is_empty() {
            return Err(CompileError::semantic("case label outside switch", loc));
        }
        let target = def.new_block(&mut self.sess.syms);
        def.seal(block, target);
        let ctx = self.switches.last_mut().unwrap();
        if ctx.cases.iter().any(|(val, _)| *val == v.imm) {
            return Err(CompileError::semantic(
                format!("duplicate case value {}", v.imm),
                loc,
            ));
        }
        ctx.cases.push((v.imm, target));
        self.statement(def, target)
    }

    fn default_label(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let loc = self.here();
        self.ts.consume(TokenKind::Default)?;
        self.ts.consume(p(':'))?;
        if self.switches.is_empty() {
            return Err(CompileError::semantic("default label outside switch", loc));
        }
        let target = def.new_block(&mut self.sess.syms);
        def.seal(block, target);
        let ctx = self.switches.last_mut().unwrap();
        if ctx.default.is_some() {
            return Err(CompileError::semantic(
                "multiple default labels in one switch",
                loc,
            ));
        }
        ctx.default = Some(target);
        self.statement(def, target)
    }

    fn break_statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let loc = self.here();
        self.ts.consume(TokenKind::Break)?;
        self.ts.consume(p(';'))?;
        let target = *self
            .break_targets
            .last()
            .ok_or_else(|| CompileError::semantic("break outside loop or switch", loc))?;
        def.seal(block, target);
        // Anything following is unreachable; give it a fresh block.
        Ok(def.new_block(&mut self.sess.syms))
    }

    fn continue_statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let loc = self.here();
        self.ts.consume(TokenKind::Continue)?;
        self.ts.consume(p(';'))?;
        let target = *self
            .continue_targets
            .last()
            .ok_or_else(|| CompileError::semantic("continue outside loop", loc))?;
        def.seal(block, target);
        Ok(def.new_block(&mut self.sess.syms))
    }

    fn return_statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let loc = self.here();
        self.ts.consume(TokenKind::Return)?;
        let ret = self.current_return.expect("return outside function");
        let mut block = block;
        if self.ts.peek().kind != p(';') {
            if self.sess.types.is_void(ret) {
                return Err(CompileError::semantic(
                    "returning a value from a void function",
                    loc,
                ));
            }
            block = self.expression(def, block)?;
            let v = def.block(block).expr.expect("return expression");
            eval::eval_return(&mut self.sess, def, block, ret, v).map_err(|e| e.at(loc))?;
        } else {
            def.block_mut(block).terminator = Terminator::Return(None);
        }
        self.ts.consume(p(';'))?;
        Ok(def.new_block(&mut self.sess.syms))
    }

    fn goto_statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        self.ts.consume(TokenKind::Goto)?;
        let tok = self.ts.consume(TokenKind::Identifier)?;
        self.ts.consume(p(';'))?;
        if let Some(&target) = self.labels.get(&tok.text) {
            def.seal(block, target);
        } else {
            self.pending_gotos.push((tok.text, block, tok.loc));
        }
        Ok(def.new_block(&mut self.sess.syms))
    }

    fn labeled_statement(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let tok = self.ts.consume(TokenKind::Identifier)?;
        self.ts.consume(p(':'))?;
        let target = def.new_block(&mut self.sess.syms);
        def.seal(block, target);
        if self.labels.insert(tok.text.clone(), target).is_some() {
            return Err(CompileError::semantic(
                format!("duplicate label '{}'", tok.text),
                tok.loc,
            ));
        }
        self.statement(def, target)
    }
}
