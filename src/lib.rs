//! cc64 - a C89 compiler targeting x86-64 ELF.
//!
//! The front end parses C declarations, expressions and statements into a
//! typed three-address IR organized as a per-function control-flow graph;
//! the back end classifies types per the System V AMD64 ABI, lowers the IR
//! to structured instruction records, and encodes them directly as ELF
//! relocatable object bytes.
//!
//! # Usage
//!
//! ```no_run
//! use cc64::elf::ElfWriter;
//! use cc64::parser::Parser;
//! use cc64::x64::codegen::CodeGen;
//!
//! let mut parser = Parser::from_source("int main(void) { return 0; }")?;
//! let mut defs = Vec::new();
//! while let Some(def) = parser.parse()? {
//!     defs.push(def);
//! }
//! let mut sess = parser.into_session();
//! let mut elf = ElfWriter::new();
//! for def in &defs {
//!     CodeGen::new(&mut sess, &mut elf).compile(def)?;
//! }
//! elf.emit_symbol_table_objects(&sess);
//! let object_bytes = elf.finish(&sess)?;
//! # Ok::<(), cc64::error::CompileError>(())
//! ```
//!
//! # Architecture
//!
//! - [`lexer`] - token records and the peek/next/consume stream
//! - [`types`] - the type table: layout, tags, conversions
//! - [`symtab`] - scoped identifier and tag namespaces
//! - [`ir`] - variables, blocks, operations, definitions
//! - [`eval`] - expression evaluation and constant folding
//! - [`parser`] - declarations, expressions, statements
//! - [`x64`] - ABI classification, instruction encoding, lowering
//! - [`elf`] - relocatable object emission
//! - [`dot`] - CFG debug dumps

pub mod dot;
pub mod elf;
pub mod error;
pub mod eval;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod session;
pub mod symtab;
pub mod types;
pub mod x64;

pub use error::{CompileError, CompileResult};
pub use parser::Parser;
pub use session::Session;
