//! Compilation session.
//!
//! Owns the process-wide, append-only tables: the type table and the symbol
//! table. A session lives for one translation unit; dropping it releases
//! every type node and symbol in bulk.

use crate::symtab::SymbolTable;
use crate::types::TypeTable;

pub struct Session {
    pub types: TypeTable,
    pub syms: SymbolTable,
}

impl Session {
    pub fn new() -> Self {
        Session {
            types: TypeTable::new(),
            syms: SymbolTable::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}
