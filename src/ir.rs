//! Intermediate representation.
//!
//! Each definition carries a control-flow graph of basic blocks holding
//! three-address operations. Blocks are owned by their definition and
//! addressed by [`BlockId`] (index into the definition's block vector), so
//! cross-block terminators store plain ids rather than references.

use crate::symtab::{SymbolId, SymbolTable};
use crate::types::TypeId;

/// Index of a block within its owning [`Definition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Operand kinds: named lvalue, pointer-indirect lvalue, address-of
/// computation, compile-time constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Immediate,
    Direct,
    Deref,
    Address,
}

/// An IR operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Var {
    pub kind: VarKind,
    pub ty: TypeId,
    pub symbol: Option<SymbolId>,
    pub offset: i32,
    pub lvalue: bool,
    /// Immediate value payload for constants.
    pub imm: i64,
}

impl Var {
    pub fn immediate(ty: TypeId, value: i64) -> Self {
        Var {
            kind: VarKind::Immediate,
            ty,
            symbol: None,
            offset: 0,
            lvalue: false,
            imm: value,
        }
    }

    /// Immediate referring to a symbol's address (string literals).
    pub fn immediate_symbol(ty: TypeId, symbol: SymbolId) -> Self {
        Var {
            kind: VarKind::Immediate,
            ty,
            symbol: Some(symbol),
            offset: 0,
            lvalue: false,
            imm: 0,
        }
    }

    pub fn direct(symbol: SymbolId, ty: TypeId) -> Self {
        Var {
            kind: VarKind::Direct,
            ty,
            symbol: Some(symbol),
            offset: 0,
            lvalue: true,
            imm: 0,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.kind == VarKind::Immediate
    }

    /// Immediate integer constant without a symbol payload.
    pub fn is_constant(&self) -> bool {
        self.kind == VarKind::Immediate && self.symbol.is_none()
    }
}

/// Three-address opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrOp {
    /// target = (T) a
    Cast,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    /// Comparisons produce 0/1 of type int.
    Eq,
    Ge,
    Gt,
    /// target = ~a
    Not,
    /// target = a
    Assign,
    /// target = *a
    Load,
    /// target = &a
    Addr,
    /// target = a(...)
    Call,
    /// push parameter a, left to right
    Param,
    VaStart,
    /// target = va_arg(a, T)
    VaArg,
}

impl IrOp {
    /// Pure value operations that fold when all operands are constant.
    pub fn is_foldable(self) -> bool {
        matches!(
            self,
            IrOp::Add
                | IrOp::Sub
                | IrOp::Mul
                | IrOp::Div
                | IrOp::Mod
                | IrOp::And
                | IrOp::Or
                | IrOp::Xor
                | IrOp::Shl
                | IrOp::Shr
                | IrOp::Eq
                | IrOp::Ge
                | IrOp::Gt
        )
    }
}

/// One three-address operation.
#[derive(Debug, Clone, Copy)]
pub struct Op {
    pub target: Var,
    pub op: IrOp,
    pub a: Var,
    pub b: Option<Var>,
}

/// Block terminator edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Not yet terminated; lowering treats it as falling off the function.
    None,
    Jump(BlockId),
    /// Conditional branch on a scalar expression.
    Branch(Var, BlockId, BlockId),
    Return(Option<Var>),
}

/// A labeled basic block.
pub struct Block {
    pub label: SymbolId,
    pub code: Vec<Op>,
    /// Value carried by the block, used while evaluating expressions that
    /// splice the CFG (logical operators, conditionals).
    pub expr: Option<Var>,
    pub terminator: Terminator,
}

/// A function or object definition with its CFG.
pub struct Definition {
    pub symbol: SymbolId,
    pub blocks: Vec<Block>,
    /// Entry block.
    pub body: BlockId,
    pub params: Vec<SymbolId>,
    /// Declared locals and compiler-generated temporaries.
    pub locals: Vec<SymbolId>,
}

impl Definition {
    pub fn new(symbol: SymbolId, syms: &mut SymbolTable) -> Self {
        let mut def = Definition {
            symbol,
            blocks: Vec::new(),
            body: BlockId(0),
            params: Vec::new(),
            locals: Vec::new(),
        };
        def.body = def.new_block(syms);
        def
    }

    /// Allocate a new empty block owned by this definition.
    pub fn new_block(&mut self, syms: &mut SymbolTable) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            label: syms.create_label(),
            code: Vec::new(),
            expr: None,
            terminator: Terminator::None,
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn emit(&mut self, block: BlockId, op: Op) {
        self.block_mut(block).code.push(op);
    }

    /// Set the fall-through edge if the block is not already terminated.
    pub fn seal(&mut self, block: BlockId, target: BlockId) {
        let b = self.block_mut(block);
        if b.terminator == Terminator::None {
            b.terminator = Terminator::Jump(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtab::{Linkage, SymbolKind, Space, SymbolTable};
    use crate::types::TypeTable;

    #[test]
    fn test_definition_owns_blocks() {
        let mut syms = SymbolTable::new();
        let f = syms.add(
            Space::Ident,
            "f",
            TypeTable::INT,
            SymbolKind::Definition,
            Linkage::Extern,
        );
        let mut def = Definition::new(f, &mut syms);
        assert_eq!(def.blocks.len(), 1);
        let b = def.new_block(&mut syms);
        assert_eq!(def.blocks.len(), 2);
        def.seal(def.body, b);
        assert_eq!(def.block(def.body).terminator, Terminator::Jump(b));
        // Sealing never overwrites an existing terminator.
        def.seal(def.body, def.body);
        assert_eq!(def.block(def.body).terminator, Terminator::Jump(b));
    }

    #[test]
    fn test_block_labels_are_fresh() {
        let mut syms = SymbolTable::new();
        let f = syms.add(
            Space::Ident,
            "f",
            TypeTable::INT,
            SymbolKind::Definition,
            Linkage::Extern,
        );
        let mut def = Definition::new(f, &mut syms);
        let b = def.new_block(&mut syms);
        assert_ne!(def.block(def.body).label, def.block(b).label);
    }
}
