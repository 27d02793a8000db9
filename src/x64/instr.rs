//! Structured x86-64 instruction records.
//!
//! The lowering pass builds [`Instruction`] values and hands them to the
//! encoder; operands carry their width so the encoder can pick prefixes and
//! immediate sizes. Symbol references (globals, string literals, call
//! targets, block labels) are [`SymbolId`]s resolved by the ELF writer.

use crate::symtab::SymbolId;

/// General-purpose and SSE register names carrying their hardware encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Register {
    Ax = 0,
    Cx = 1,
    Dx = 2,
    Bx = 3,
    Sp = 4,
    Bp = 5,
    Si = 6,
    Di = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
    Xmm0 = 16,
    Xmm1 = 17,
    Xmm2 = 18,
    Xmm3 = 19,
    Xmm4 = 20,
    Xmm5 = 21,
    Xmm6 = 22,
    Xmm7 = 23,
    Xmm8 = 24,
    Xmm9 = 25,
    Xmm10 = 26,
    Xmm11 = 27,
    Xmm12 = 28,
    Xmm13 = 29,
    Xmm14 = 30,
    Xmm15 = 31,
}

impl Register {
    /// Low three bits for ModR/M and opcode-register fields.
    pub fn low3(self) -> u8 {
        (self as u8) & 7
    }

    /// Requires the REX.R/X/B extension bit.
    pub fn is_extended(self) -> bool {
        matches!(self as u8, 8..=15 | 24..=31)
    }

    pub fn is_xmm(self) -> bool {
        self as u8 >= 16
    }
}

/// A register operand with its width in bytes (1, 2, 4 or 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg {
    pub r: Register,
    pub w: u8,
}

impl Reg {
    pub fn new(r: Register, w: u8) -> Self {
        debug_assert!(matches!(w, 1 | 2 | 4 | 8));
        Reg { r, w }
    }

    pub fn is_64(self) -> bool {
        self.w == 8
    }

    pub fn is_16(self) -> bool {
        self.w == 2
    }

    /// An 8-bit operand naming SPL/BPL/SIL/DIL needs a REX prefix even when
    /// no extension bits are set.
    pub fn needs_rex_for_byte(self) -> bool {
        self.w == 1
            && matches!(
                self.r,
                Register::Sp | Register::Bp | Register::Si | Register::Di
            )
    }
}

/// A memory address: either base register plus displacement, or a
/// RIP-relative symbol reference (which registers a relocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub base: Option<Register>,
    pub disp: i32,
    pub sym: Option<SymbolId>,
}

impl Address {
    pub fn base(base: Register, disp: i32) -> Self {
        Address {
            base: Some(base),
            disp,
            sym: None,
        }
    }

    pub fn symbol(sym: SymbolId, disp: i32) -> Self {
        Address {
            base: None,
            disp,
            sym: Some(sym),
        }
    }
}

/// A memory operand with access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    pub w: u8,
    pub addr: Address,
}

impl Mem {
    pub fn new(w: u8, addr: Address) -> Self {
        debug_assert!(matches!(w, 1 | 2 | 4 | 8));
        Mem { w, addr }
    }
}

/// Immediate payloads: plain integers, or the address of a symbol (which
/// becomes an absolute relocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmValue {
    Int(i64),
    Addr(SymbolId, i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Immediate {
    pub w: u8,
    pub value: ImmValue,
}

impl Immediate {
    pub fn int(w: u8, value: i64) -> Self {
        Immediate {
            w,
            value: ImmValue::Int(value),
        }
    }

    pub fn addr(sym: SymbolId, disp: i32) -> Self {
        Immediate {
            w: 8,
            value: ImmValue::Addr(sym, disp),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.value {
            ImmValue::Int(v) => Some(v),
            ImmValue::Addr(..) => None,
        }
    }
}

/// Operand-type tag plus the operands, source before destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    Reg(Reg),
    Mem(Mem),
    Imm(Immediate),
    RegReg(Reg, Reg),
    RegMem(Reg, Mem),
    MemReg(Mem, Reg),
    ImmReg(Immediate, Reg),
    ImmMem(Immediate, Mem),
}

/// Conditional test field (tttn) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    Ae = 0x3,
    Z = 0x4,
    A = 0x7,
    Ge = 0xD,
    G = 0xF,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Mov,
    Movsx,
    Movzx,
    Movaps,
    Push,
    Add,
    Sub,
    Cmp,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Not,
    Mul,
    Div,
    Lea,
    Leave,
    RepMovsq,
    Ret,
    Call,
    Jmp,
    Jcc(Cond),
    Setcc(Cond),
    Test,
    Nop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Operands,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Operands) -> Self {
        Instruction { opcode, operands }
    }

    pub fn nullary(opcode: Opcode) -> Self {
        Instruction {
            opcode,
            operands: Operands::None,
        }
    }
}
