//! x86-64 architecture-specific components.
//!
//! This module contains all x86-64 specific code:
//! - System V AMD64 parameter classification
//! - Structured instruction records and the byte encoder
//! - CFG lowering into encoded machine code

pub mod abi;
pub mod codegen;
pub mod encoder;
pub mod instr;

pub use abi::{classify, classify_call, classify_signature, ParamClass};
pub use encoder::{encode, Code, RelocKind, RelocSink};
pub use instr::{Address, Cond, Immediate, Instruction, Mem, Opcode, Operands, Reg, Register};
