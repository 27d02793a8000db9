//! Scoped symbol tables.
//!
//! Two disjoint namespaces: identifiers (objects, functions, typedefs, enum
//! constants, labels) and tags (struct/union/enum tag names). Each namespace
//! is a stack of scopes; lookups see the most recent binding across all live
//! scopes. Symbols themselves are stored centrally and addressed by stable
//! [`SymbolId`]s that outlive scope exit, since the IR and types keep
//! referring to them.

use crate::types::TypeId;

/// Stable handle to a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Declaration,
    Tentative,
    Definition,
    Typedef,
    StringValue,
    EnumValue,
    Label,
    Temporary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    None,
    Intern,
    Extern,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ty: TypeId,
    pub kind: SymbolKind,
    pub linkage: Linkage,
    /// Scope nesting depth at the point of declaration; zero is file scope.
    pub depth: u32,
    /// Value payload for enum constants; also the enum tag definition
    /// sentinel.
    pub enum_value: i64,
    /// Payload for string constants and `__func__`.
    pub string_value: Option<String>,
}

/// Which namespace an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Ident,
    Tag,
}

#[derive(Default)]
struct Namespace {
    /// One vector of bindings per live scope, innermost last.
    scopes: Vec<Vec<SymbolId>>,
}

impl Namespace {
    fn current_depth(&self) -> u32 {
        self.scopes.len() as u32 - 1
    }
}

pub struct SymbolTable {
    symbols: Vec<Symbol>,
    ident: Namespace,
    tag: Namespace,
    temporaries: u32,
    labels: u32,
    strings: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: Vec::new(),
            ident: Namespace {
                scopes: vec![Vec::new()],
            },
            tag: Namespace {
                scopes: vec![Vec::new()],
            },
            temporaries: 0,
            labels: 0,
            strings: 0,
        }
    }

    fn ns(&self, space: Space) -> &Namespace {
        match space {
            Space::Ident => &self.ident,
            Space::Tag => &self.tag,
        }
    }

    fn ns_mut(&mut self, space: Space) -> &mut Namespace {
        match space {
            Space::Ident => &mut self.ident,
            Space::Tag => &mut self.tag,
        }
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn current_depth(&self, space: Space) -> u32 {
        self.ns(space).current_depth()
    }

    pub fn push_scope(&mut self, space: Space) {
        self.ns_mut(space).scopes.push(Vec::new());
    }

    /// Discard all bindings at the current depth. The symbols themselves
    /// remain addressable by id.
    pub fn pop_scope(&mut self, space: Space) {
        let ns = self.ns_mut(space);
        debug_assert!(ns.scopes.len() > 1);
        ns.scopes.pop();
    }

    /// Insert a binding at the current scope, returning its stable id.
    pub fn add(
        &mut self,
        space: Space,
        name: &str,
        ty: TypeId,
        kind: SymbolKind,
        linkage: Linkage,
    ) -> SymbolId {
        let depth = self.ns(space).current_depth();
        let id = self.push_symbol(Symbol {
            name: name.to_string(),
            ty,
            kind,
            linkage,
            depth,
            enum_value: 0,
            string_value: None,
        });
        self.ns_mut(space).scopes.last_mut().unwrap().push(id);
        id
    }

    /// Most recent binding by name across all live scopes.
    pub fn lookup(&self, space: Space, name: &str) -> Option<SymbolId> {
        let ns = self.ns(space);
        for scope in ns.scopes.iter().rev() {
            for &id in scope.iter().rev() {
                if self.symbols[id.0 as usize].name == name {
                    return Some(id);
                }
            }
        }
        None
    }

    fn push_symbol(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        id
    }

    /// Anonymous temporary of the given type, bound in no namespace.
    pub fn create_tmp(&mut self, ty: TypeId) -> SymbolId {
        let n = self.temporaries;
        self.temporaries += 1;
        let depth = self.ident.current_depth();
        self.push_symbol(Symbol {
            name: format!(".t{}", n),
            ty,
            kind: SymbolKind::Temporary,
            linkage: Linkage::None,
            depth,
            enum_value: 0,
            string_value: None,
        })
    }

    /// Fresh block label.
    pub fn create_label(&mut self) -> SymbolId {
        let n = self.labels;
        self.labels += 1;
        self.push_symbol(Symbol {
            name: format!(".L{}", n),
            ty: TypeId(0),
            kind: SymbolKind::Label,
            linkage: Linkage::None,
            depth: 0,
            enum_value: 0,
            string_value: None,
        })
    }

    /// Anonymous string-value symbol holding literal data.
    pub fn create_string(&mut self, value: &str, ty: TypeId) -> SymbolId {
        let n = self.strings;
        self.strings += 1;
        self.push_symbol(Symbol {
            name: format!(".LC{}", n),
            ty,
            kind: SymbolKind::StringValue,
            linkage: Linkage::Intern,
            depth: 0,
            enum_value: 0,
            string_value: Some(value.to_string()),
        })
    }

    /// Iterate every symbol ever created, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeTable;

    #[test]
    fn test_scoped_lookup_and_shadowing() {
        let mut syms = SymbolTable::new();
        let outer = syms.add(
            Space::Ident,
            "x",
            TypeTable::INT,
            SymbolKind::Definition,
            Linkage::None,
        );
        syms.push_scope(Space::Ident);
        let inner = syms.add(
            Space::Ident,
            "x",
            TypeTable::CHAR,
            SymbolKind::Definition,
            Linkage::None,
        );
        assert_eq!(syms.lookup(Space::Ident, "x"), Some(inner));
        syms.pop_scope(Space::Ident);
        assert_eq!(syms.lookup(Space::Ident, "x"), Some(outer));
        // The inner symbol stays addressable after its scope dies.
        assert_eq!(syms.get(inner).name, "x");
        assert_eq!(syms.get(inner).depth, 1);
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        let mut syms = SymbolTable::new();
        syms.add(
            Space::Tag,
            "node",
            TypeTable::INT,
            SymbolKind::Typedef,
            Linkage::None,
        );
        assert!(syms.lookup(Space::Ident, "node").is_none());
        assert!(syms.lookup(Space::Tag, "node").is_some());
    }

    #[test]
    fn test_temporaries_and_labels_unique() {
        let mut syms = SymbolTable::new();
        let a = syms.create_tmp(TypeTable::INT);
        let b = syms.create_tmp(TypeTable::INT);
        assert_ne!(syms.get(a).name, syms.get(b).name);
        let l1 = syms.create_label();
        let l2 = syms.create_label();
        assert_ne!(syms.get(l1).name, syms.get(l2).name);
        assert_eq!(syms.get(a).kind, SymbolKind::Temporary);
        assert_eq!(syms.get(l1).kind, SymbolKind::Label);
    }

    #[test]
    fn test_string_symbol_payload() {
        let mut syms = SymbolTable::new();
        let s = syms.create_string("hello", TypeTable::CHAR);
        assert_eq!(syms.get(s).string_value.as_deref(), Some("hello"));
        assert_eq!(syms.get(s).kind, SymbolKind::StringValue);
        assert_eq!(syms.get(s).linkage, Linkage::Intern);
    }
}
