//! Recursive-descent parser producing typed IR.
//!
//! The parser consumes whole declaration statements, which can contain
//! multiple definitions (`int foo = 1, bar = 2;`). Finished definitions are
//! buffered and handed out one at a time by [`Parser::parse`]; tentative
//! declarations only touch the symbol table.
//!
//! Expression parsing threads a `(definition, block)` pair through every
//! rule: rules return the block execution continues in, with the computed
//! value stored as that block's expression. Short-circuit operators and
//! conditionals splice fresh blocks into the graph, which is why the current
//! block can change mid-expression.

mod declaration;
mod expression;
mod statement;

use crate::error::{CompileError, CompileResult};
use crate::ir::{BlockId, Definition};
use crate::lexer::{SourceLocation, TokenKind, TokenStream};
use crate::session::Session;
use crate::symtab::{Space, SymbolKind};
use crate::types::TypeTable;
use std::collections::{HashMap, VecDeque};

/// Shorthand for single-character punctuator kinds.
pub(crate) fn p(c: char) -> TokenKind {
    TokenKind::Punct(c)
}

/// Collected `case`/`default` targets of the innermost switch.
struct SwitchContext {
    value: crate::ir::Var,
    cases: Vec<(i64, BlockId)>,
    default: Option<BlockId>,
}

pub struct Parser {
    ts: TokenStream,
    sess: Session,
    defs: VecDeque<Definition>,

    // Statement context for the function currently being parsed.
    break_targets: Vec<BlockId>,
    continue_targets: Vec<BlockId>,
    switches: Vec<SwitchContext>,
    labels: HashMap<String, BlockId>,
    pending_gotos: Vec<(String, BlockId, SourceLocation)>,
    current_return: Option<crate::types::TypeId>,
}

impl Parser {
    pub fn new(ts: TokenStream) -> Self {
        Parser {
            ts,
            sess: Session::new(),
            defs: VecDeque::new(),
            break_targets: Vec::new(),
            continue_targets: Vec::new(),
            switches: Vec::new(),
            labels: HashMap::new(),
            pending_gotos: Vec::new(),
            current_return: None,
        }
    }

    pub fn from_source(source: &str) -> CompileResult<Self> {
        Ok(Parser::new(TokenStream::from_source(source)?))
    }

    pub fn session(&self) -> &Session {
        &self.sess
    }

    pub fn into_session(self) -> Session {
        self.sess
    }

    /// Buffer one or more top-level definitions and return the next one.
    /// Returns `None` once the input is exhausted.
    pub fn parse(&mut self) -> CompileResult<Option<Definition>> {
        while self.defs.is_empty() && self.ts.peek().kind != TokenKind::End {
            self.external_declaration()?;
        }
        if let Some(def) = self.defs.pop_front() {
            log::debug!(
                "parsed definition '{}'",
                self.sess.syms.get(def.symbol).name
            );
            return Ok(Some(def));
        }
        Ok(None)
    }

    fn here(&self) -> SourceLocation {
        self.ts.peek().loc
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::semantic(message, self.here())
    }

    /// Whether the token begins a type name (for casts, sizeof and
    /// declaration detection).
    fn starts_type_name(&self, n: usize) -> bool {
        let tok = self.ts.nth(n);
        match tok.kind {
            TokenKind::Void
            | TokenKind::Char
            | TokenKind::Short
            | TokenKind::Int
            | TokenKind::Long
            | TokenKind::Float
            | TokenKind::Double
            | TokenKind::Signed
            | TokenKind::Unsigned
            | TokenKind::Struct
            | TokenKind::Union
            | TokenKind::Enum
            | TokenKind::Const
            | TokenKind::Volatile => true,
            TokenKind::Identifier => self
                .sess
                .syms
                .lookup(Space::Ident, &tok.text)
                .map(|id| self.sess.syms.get(id).kind == SymbolKind::Typedef)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Whether the next tokens begin a declaration rather than a statement.
    fn starts_declaration(&self) -> bool {
        matches!(
            self.ts.peek().kind,
            TokenKind::Auto
                | TokenKind::Register
                | TokenKind::Static
                | TokenKind::Extern
                | TokenKind::Typedef
        ) || self.starts_type_name(0)
    }

    /// Parse and fold a constant expression, evaluated inside a throwaway
    /// sandbox definition so no live CFG is disturbed.
    pub(crate) fn constant_expression(&mut self) -> CompileResult<crate::ir::Var> {
        let loc = self.here();
        let scratch = self.sess.syms.create_tmp(TypeTable::INT);
        let mut sandbox = Definition::new(scratch, &mut self.sess.syms);
        let body = sandbox.body;
        let end = self.conditional_expression(&mut sandbox, body)?;
        let v = sandbox
            .block(end)
            .expr
            .ok_or_else(|| CompileError::semantic("expected expression", loc))?;
        if !v.is_constant() {
            return Err(CompileError::semantic(
                "expression is not a compile-time constant",
                loc,
            ));
        }
        Ok(v)
    }
}
