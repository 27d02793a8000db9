//! The type system.
//!
//! Type nodes live in an id-indexed table owned by the compilation session;
//! [`TypeId`] values are stable for the lifetime of the table and are what
//! every other component stores. Struct and union definitions own their
//! member lists; a *tagged* node is a lightweight alias pointing at the
//! defining node so qualifiers can be attached per use-site without mutating
//! the definition.
//!
//! Layout follows the usual x86-64 rules: each struct member is padded to its
//! natural alignment and the total size rounds up to the strongest member
//! alignment; union size is the largest member; array size is element size
//! times count, with zero marking an incomplete array.

use std::fmt;

/// Index of a type node in the [`TypeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Signed,
    Unsigned,
    Real,
    Pointer,
    Array,
    Struct,
    Union,
    Function,
}

/// Const/volatile qualifier set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Qualifiers(u8);

impl Qualifiers {
    pub const NONE: Qualifiers = Qualifiers(0);
    pub const CONST: Qualifiers = Qualifiers(1);
    pub const VOLATILE: Qualifiers = Qualifiers(2);

    pub fn contains(self, other: Qualifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Qualifiers) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Qualifiers) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// A struct/union field or function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: Option<String>,
    pub ty: TypeId,
    pub offset: u32,
}

/// Marker passed to [`TypeTable::add_member`] to flag a variadic tail.
pub const ELLIPSIS: &str = "...";

#[derive(Debug, Clone)]
pub struct TypeNode {
    pub kind: TypeKind,
    pub size: u32,
    pub qualifiers: Qualifiers,
    /// Element type for arrays, pointee for pointers, return type for
    /// functions, defining node for tagged aliases.
    pub next: Option<TypeId>,
    pub members: Vec<Member>,
    pub vararg: bool,
    /// Set only on tagged alias nodes.
    pub tag: Option<String>,
}

impl TypeNode {
    fn new(kind: TypeKind) -> Self {
        TypeNode {
            kind,
            size: 0,
            qualifiers: Qualifiers::NONE,
            next: None,
            members: Vec::new(),
            vararg: false,
            tag: None,
        }
    }
}

/// The compilation-wide table of type nodes.
///
/// Construction pre-seeds the basic types at fixed ids so the common cases
/// never allocate.
pub struct TypeTable {
    nodes: Vec<TypeNode>,
}

impl TypeTable {
    pub const VOID: TypeId = TypeId(0);
    pub const CHAR: TypeId = TypeId(1);
    pub const SHORT: TypeId = TypeId(2);
    pub const INT: TypeId = TypeId(3);
    pub const LONG: TypeId = TypeId(4);
    pub const UCHAR: TypeId = TypeId(5);
    pub const USHORT: TypeId = TypeId(6);
    pub const UINT: TypeId = TypeId(7);
    pub const ULONG: TypeId = TypeId(8);
    pub const FLOAT: TypeId = TypeId(9);
    pub const DOUBLE: TypeId = TypeId(10);

    pub fn new() -> Self {
        let mut table = TypeTable { nodes: Vec::new() };
        table.push(TypeNode::new(TypeKind::Void));
        for (kind, size) in [
            (TypeKind::Signed, 1),
            (TypeKind::Signed, 2),
            (TypeKind::Signed, 4),
            (TypeKind::Signed, 8),
            (TypeKind::Unsigned, 1),
            (TypeKind::Unsigned, 2),
            (TypeKind::Unsigned, 4),
            (TypeKind::Unsigned, 8),
            (TypeKind::Real, 4),
            (TypeKind::Real, 8),
        ] {
            let mut node = TypeNode::new(kind);
            node.size = size;
            table.push(node);
        }
        table
    }

    fn push(&mut self, node: TypeNode) -> TypeId {
        let id = TypeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeNode {
        &self.nodes[id.0 as usize]
    }

    fn get_mut(&mut self, id: TypeId) -> &mut TypeNode {
        &mut self.nodes[id.0 as usize]
    }

    // ==== CONSTRUCTION ====

    /// Basic integer type of the given signedness and byte size.
    pub fn integer(&self, signed: bool, size: u32) -> TypeId {
        match (signed, size) {
            (true, 1) => Self::CHAR,
            (true, 2) => Self::SHORT,
            (true, 4) => Self::INT,
            (true, 8) => Self::LONG,
            (false, 1) => Self::UCHAR,
            (false, 2) => Self::USHORT,
            (false, 4) => Self::UINT,
            (false, 8) => Self::ULONG,
            _ => panic!("invalid integer size {}", size),
        }
    }

    pub fn pointer_to(&mut self, next: TypeId) -> TypeId {
        let mut node = TypeNode::new(TypeKind::Pointer);
        node.next = Some(next);
        node.size = 8;
        self.push(node)
    }

    /// Pointer node with a possibly unresolved pointee. Declarator plumbing
    /// for `void (*f)(int)`-style nesting, where the inner chain is built
    /// before its tail type is known and spliced afterwards.
    pub fn pointer_to_opt(&mut self, next: Option<TypeId>) -> TypeId {
        let mut node = TypeNode::new(TypeKind::Pointer);
        node.next = next;
        node.size = 8;
        self.push(node)
    }

    /// Walk a declarator chain to its innermost node (the one with no
    /// `next`), returning its id.
    pub fn chain_tail(&self, head: TypeId) -> TypeId {
        let mut cur = head;
        while let Some(next) = self.get(cur).next {
            cur = next;
        }
        cur
    }

    /// Splice `next` onto the given chain tail node.
    pub fn set_next(&mut self, tail: TypeId, next: TypeId) {
        debug_assert!(self.get(tail).next.is_none());
        self.get_mut(tail).next = Some(next);
    }

    /// Array of `count` elements; a zero count yields an incomplete array.
    pub fn array_of(&mut self, elem: TypeId, count: u32) -> TypeId {
        let mut node = TypeNode::new(TypeKind::Array);
        node.size = self.size_of(elem) * count;
        node.next = Some(elem);
        self.push(node)
    }

    pub fn function(&mut self, ret: TypeId) -> TypeId {
        let mut node = TypeNode::new(TypeKind::Function);
        node.next = Some(ret);
        self.push(node)
    }

    pub fn struct_type(&mut self) -> TypeId {
        self.push(TypeNode::new(TypeKind::Struct))
    }

    pub fn union_type(&mut self) -> TypeId {
        self.push(TypeNode::new(TypeKind::Union))
    }

    /// Fresh node with the same contents as `id`. Used to attach qualifiers
    /// to basic or typedef'ed types without mutating the original.
    pub fn clone_node(&mut self, id: TypeId) -> TypeId {
        let node = self.get(id).clone();
        self.push(node)
    }

    /// Create a tag node aliasing a struct or union definition. The alias
    /// carries no members of its own; qualifiers attached to it never reach
    /// the definition.
    pub fn tagged_copy(&mut self, def: TypeId, name: &str) -> TypeId {
        debug_assert!(!self.is_tagged(def));
        debug_assert!(self.is_struct_or_union(def));
        let kind = self.get(def).kind;
        let mut node = TypeNode::new(kind);
        node.tag = Some(name.to_string());
        node.next = Some(def);
        self.push(node)
    }

    /// Record a member on a struct, union or function type.
    ///
    /// Function parameters named [`ELLIPSIS`] set the variadic flag instead of
    /// inserting, and array parameters decay to pointer-to-element. Struct
    /// members are re-laid-out on every insertion; union size tracks the
    /// largest member.
    pub fn add_member(&mut self, ty: TypeId, name: Option<&str>, member_ty: TypeId) {
        debug_assert!(self.is_struct_or_union(ty) || self.is_function(ty));
        debug_assert!(!self.is_tagged(ty));

        let mut member_ty = member_ty;
        if self.is_function(ty) {
            debug_assert!(!self.get(ty).vararg);
            if name == Some(ELLIPSIS) {
                self.get_mut(ty).vararg = true;
                return;
            }
            if self.is_array(member_ty) {
                let elem = self.get(member_ty).next.unwrap();
                member_ty = self.pointer_to(elem);
            }
        }

        self.get_mut(ty).members.push(Member {
            name: name.map(str::to_string),
            ty: member_ty,
            offset: 0,
        });

        match self.get(ty).kind {
            TypeKind::Struct => {
                let size = self.align_struct_members(ty);
                self.get_mut(ty).size = size;
            }
            TypeKind::Union => {
                let msize = self.size_of(member_ty);
                let node = self.get_mut(ty);
                if node.size < msize {
                    node.size = msize;
                }
            }
            _ => {}
        }
    }

    /// Re-layout a struct's member list: pad each offset up to the member's
    /// alignment, then round the total up to the strongest alignment.
    fn align_struct_members(&mut self, ty: TypeId) -> u32 {
        let mut size = 0u32;
        let mut max_alignment = 0u32;
        for i in 0..self.get(ty).members.len() {
            let mty = self.get(ty).members[i].ty;
            let alignment = self.alignment(mty);
            if alignment > max_alignment {
                max_alignment = alignment;
            }
            if size % alignment != 0 {
                size += alignment - size % alignment;
            }
            self.get_mut(ty).members[i].offset = size;
            size += self.size_of(mty);
        }
        if max_alignment != 0 && size % max_alignment != 0 {
            size += max_alignment - size % max_alignment;
        }
        size
    }

    // ==== PREDICATES ====

    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.get(id).kind
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        self.get(id).kind == TypeKind::Void
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        matches!(self.get(id).kind, TypeKind::Signed | TypeKind::Unsigned)
    }

    pub fn is_unsigned(&self, id: TypeId) -> bool {
        self.get(id).kind == TypeKind::Unsigned
    }

    pub fn is_real(&self, id: TypeId) -> bool {
        self.get(id).kind == TypeKind::Real
    }

    pub fn is_arithmetic(&self, id: TypeId) -> bool {
        self.is_integer(id) || self.is_real(id)
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        self.get(id).kind == TypeKind::Pointer
    }

    pub fn is_scalar(&self, id: TypeId) -> bool {
        self.is_arithmetic(id) || self.is_pointer(id)
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        self.get(id).kind == TypeKind::Array
    }

    pub fn is_struct_or_union(&self, id: TypeId) -> bool {
        matches!(self.get(id).kind, TypeKind::Struct | TypeKind::Union)
    }

    pub fn is_union(&self, id: TypeId) -> bool {
        self.unwrap_node(id).kind == TypeKind::Union
    }

    pub fn is_function(&self, id: TypeId) -> bool {
        self.get(id).kind == TypeKind::Function
    }

    pub fn is_tagged(&self, id: TypeId) -> bool {
        self.get(id).tag.is_some() && self.is_struct_or_union(id)
    }

    pub fn is_const(&self, id: TypeId) -> bool {
        self.get(id).qualifiers.contains(Qualifiers::CONST)
    }

    pub fn is_volatile(&self, id: TypeId) -> bool {
        self.get(id).qualifiers.contains(Qualifiers::VOLATILE)
    }

    /// An object type occupies storage: anything but functions.
    pub fn is_object(&self, id: TypeId) -> bool {
        !self.is_function(id)
    }

    // ==== QUERIES ====

    /// Resolve a tagged alias to its defining node.
    pub fn unwrapped(&self, id: TypeId) -> TypeId {
        if self.is_tagged(id) {
            self.get(id).next.unwrap()
        } else {
            id
        }
    }

    fn unwrap_node(&self, id: TypeId) -> &TypeNode {
        self.get(self.unwrapped(id))
    }

    /// Size in bytes, dereferencing through a tag.
    pub fn size_of(&self, id: TypeId) -> u32 {
        if self.is_tagged(id) {
            self.get(self.get(id).next.unwrap()).size
        } else {
            self.get(id).size
        }
    }

    /// Natural alignment: element alignment for arrays, strongest member for
    /// aggregates, size for scalars.
    pub fn alignment(&self, id: TypeId) -> u32 {
        debug_assert!(self.is_object(id));
        let node = self.unwrap_node(id);
        match node.kind {
            TypeKind::Array => self.alignment(node.next.unwrap()),
            TypeKind::Struct | TypeKind::Union => {
                let mut m = 0;
                for member in &node.members {
                    let d = self.alignment(member.ty);
                    if d > m {
                        m = d;
                    }
                }
                debug_assert!(m != 0);
                m
            }
            _ => node.size,
        }
    }

    pub fn nmembers(&self, id: TypeId) -> usize {
        self.unwrap_node(id).members.len()
    }

    pub fn member(&self, id: TypeId, n: usize) -> &Member {
        &self.unwrap_node(id).members[n]
    }

    pub fn find_member(&self, id: TypeId, name: &str) -> Option<&Member> {
        debug_assert!(self.is_struct_or_union(id));
        self.unwrap_node(id)
            .members
            .iter()
            .find(|m| m.name.as_deref() == Some(name))
    }

    pub fn is_vararg(&self, id: TypeId) -> bool {
        debug_assert!(self.is_function(id));
        self.get(id).vararg
    }

    /// Element count of a complete array type.
    pub fn array_len(&self, id: TypeId) -> u32 {
        debug_assert!(self.is_array(id));
        let node = self.get(id);
        let elem = self.size_of(node.next.unwrap());
        if elem == 0 {
            0
        } else {
            node.size / elem
        }
    }

    /// Pointee of a pointer type, through tag indirections.
    pub fn deref(&self, id: TypeId) -> TypeId {
        debug_assert!(self.is_pointer(id));
        self.unwrapped(self.get(id).next.unwrap())
    }

    /// Return type of a function type.
    pub fn return_type(&self, id: TypeId) -> TypeId {
        debug_assert!(self.is_function(id));
        self.get(id).next.unwrap()
    }

    /// Element/pointee/return link.
    pub fn next(&self, id: TypeId) -> Option<TypeId> {
        self.get(id).next
    }

    pub fn qualifiers(&self, id: TypeId) -> Qualifiers {
        self.get(id).qualifiers
    }

    /// Attach qualifiers to a node. Only meaningful on nodes the caller owns
    /// (fresh copies or tagged aliases).
    pub fn set_qualifiers(&mut self, id: TypeId, qualifiers: Qualifiers) {
        self.get_mut(id).qualifiers = qualifiers;
    }

    /// Complete an incomplete array in place with a byte size.
    pub fn complete_array(&mut self, id: TypeId, size: u32) {
        debug_assert!(self.is_array(id));
        debug_assert!(self.get(id).size == 0);
        self.get_mut(id).size = size;
    }

    // ==== COMPARISON AND CONVERSION ====

    /// Structural equality, disregarding qualifiers and parameter names.
    /// Tagged pairs compare by identity of the defining node.
    pub fn equal(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        if self.is_tagged(a) && self.is_tagged(b) {
            return self.get(a).next == self.get(b).next;
        }
        let a = self.unwrapped(a);
        let b = self.unwrapped(b);
        if a == b {
            return true;
        }
        let na = self.get(a);
        let nb = self.get(b);
        if na.kind != nb.kind
            || na.size != nb.size
            || na.members.len() != nb.members.len()
            || self.is_unsigned(a) != self.is_unsigned(b)
        {
            return false;
        }
        match (na.next, nb.next) {
            (None, None) => {}
            (Some(x), Some(y)) => {
                if !self.equal(x, y) {
                    return false;
                }
            }
            _ => return false,
        }
        for (ma, mb) in na.members.iter().zip(nb.members.iter()) {
            if !self.equal(ma.ty, mb.ty) {
                return false;
            }
            if self.is_struct_or_union(a) && ma.name != mb.name {
                return false;
            }
            debug_assert!(ma.offset == mb.offset);
        }
        true
    }

    /// 6.2.7 compatible types, simplified.
    pub fn compatible(&self, a: TypeId, b: TypeId) -> bool {
        self.equal(a, b)
    }

    /// Integer promotion: anything smaller than `int` widens to `int` or
    /// `unsigned int`.
    pub fn promote_integer(&self, id: TypeId) -> TypeId {
        debug_assert!(self.is_integer(id));
        if self.size_of(id) < 4 {
            if self.is_unsigned(id) {
                Self::UINT
            } else {
                Self::INT
            }
        } else {
            id
        }
    }

    fn remove_qualifiers(&mut self, id: TypeId) -> TypeId {
        if self.get(id).qualifiers.is_empty() {
            id
        } else {
            debug_assert!(self.nmembers(id) == 0);
            let copy = self.clone_node(id);
            self.get_mut(copy).qualifiers = Qualifiers::NONE;
            copy
        }
    }

    /// Common type of two arithmetic operands. Floating types are elided:
    /// both operands are integer-promoted, the wider wins, and ties favor
    /// the unsigned operand. The result carries no qualifiers.
    pub fn usual_arithmetic_conversion(&mut self, t1: TypeId, t2: TypeId) -> TypeId {
        debug_assert!(self.is_arithmetic(t1) && self.is_arithmetic(t2));
        debug_assert!(self.is_integer(t1) && self.is_integer(t2));
        let t1 = self.promote_integer(t1);
        let t2 = self.promote_integer(t2);
        if self.size_of(t1) > self.size_of(t2) {
            self.remove_qualifiers(t1)
        } else if self.size_of(t2) > self.size_of(t1) {
            self.remove_qualifiers(t2)
        } else if self.is_unsigned(t1) {
            self.remove_qualifiers(t1)
        } else {
            self.remove_qualifiers(t2)
        }
    }

    /// Renderer implementing `Display` for a type.
    pub fn display(&self, id: TypeId) -> TypeDisplay<'_> {
        TypeDisplay { table: self, id }
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        TypeTable::new()
    }
}

/// Formats a type in the compiler's debug syntax: qualifiers first, tags as
/// `struct name`, pointers as `* T`, arrays as `[n] T`, functions as
/// `(params) -> T`, aggregates listing members with offsets.
pub struct TypeDisplay<'a> {
    table: &'a TypeTable,
    id: TypeId,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.write(f, self.id)
    }
}

impl TypeDisplay<'_> {
    fn write(&self, f: &mut fmt::Formatter, id: TypeId) -> fmt::Result {
        let t = self.table;
        let node = t.get(id);

        if t.is_const(id) {
            write!(f, "const ")?;
        }
        if t.is_volatile(id) {
            write!(f, "volatile ")?;
        }

        if t.is_tagged(id) {
            let keyword = if node.kind == TypeKind::Union {
                "union"
            } else {
                "struct"
            };
            return write!(f, "{} {}", keyword, node.tag.as_deref().unwrap());
        }

        match node.kind {
            TypeKind::Void => write!(f, "void"),
            TypeKind::Signed | TypeKind::Unsigned => {
                if node.kind == TypeKind::Unsigned {
                    write!(f, "unsigned ")?;
                }
                match node.size {
                    1 => write!(f, "char"),
                    2 => write!(f, "short"),
                    4 => write!(f, "int"),
                    _ => write!(f, "long"),
                }
            }
            TypeKind::Real => match node.size {
                4 => write!(f, "float"),
                _ => write!(f, "double"),
            },
            TypeKind::Pointer => {
                write!(f, "* ")?;
                self.write(f, node.next.unwrap())
            }
            TypeKind::Array => {
                if node.size > 0 {
                    write!(f, "[{}] ", t.array_len(id))?;
                } else {
                    write!(f, "[] ")?;
                }
                self.write(f, node.next.unwrap())
            }
            TypeKind::Function => {
                write!(f, "(")?;
                for (i, member) in node.members.iter().enumerate() {
                    self.write(f, member.ty)?;
                    if i + 1 < node.members.len() {
                        write!(f, ", ")?;
                    }
                }
                if node.vararg {
                    write!(f, ", ...")?;
                }
                write!(f, ") -> ")?;
                self.write(f, node.next.unwrap())
            }
            TypeKind::Struct | TypeKind::Union => {
                write!(f, "{{")?;
                for (i, member) in node.members.iter().enumerate() {
                    write!(f, ".{}::", member.name.as_deref().unwrap_or(""))?;
                    self.write(f, member.ty)?;
                    write!(f, " (+{})", member.offset)?;
                    if i + 1 < node.members.len() {
                        write!(f, ", ")?;
                    }
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_layout_int_char() {
        // struct P { int x; char y; }; size 8, alignment 4, offsets 0 and 4.
        let mut t = TypeTable::new();
        let s = t.struct_type();
        t.add_member(s, Some("x"), TypeTable::INT);
        t.add_member(s, Some("y"), TypeTable::CHAR);
        assert_eq!(t.size_of(s), 8);
        assert_eq!(t.alignment(s), 4);
        assert_eq!(t.member(s, 0).offset, 0);
        assert_eq!(t.member(s, 1).offset, 4);
    }

    #[test]
    fn test_struct_layout_padding_between() {
        // struct { char c; long l; }: l lands at 8, total 16.
        let mut t = TypeTable::new();
        let s = t.struct_type();
        t.add_member(s, Some("c"), TypeTable::CHAR);
        t.add_member(s, Some("l"), TypeTable::LONG);
        assert_eq!(t.member(s, 1).offset, 8);
        assert_eq!(t.size_of(s), 16);
        assert_eq!(t.alignment(s), 8);
    }

    #[test]
    fn test_union_size_is_max_member() {
        let mut t = TypeTable::new();
        let u = t.union_type();
        t.add_member(u, Some("i"), TypeTable::INT);
        t.add_member(u, Some("l"), TypeTable::LONG);
        t.add_member(u, Some("c"), TypeTable::CHAR);
        assert_eq!(t.size_of(u), 8);
        assert_eq!(t.member(u, 0).offset, 0);
        assert_eq!(t.member(u, 2).offset, 0);
    }

    #[test]
    fn test_array_sizes() {
        let mut t = TypeTable::new();
        let a = t.array_of(TypeTable::INT, 3);
        assert_eq!(t.size_of(a), 12);
        assert_eq!(t.array_len(a), 3);
        assert_eq!(t.alignment(a), 4);
        let incomplete = t.array_of(TypeTable::INT, 0);
        assert_eq!(t.size_of(incomplete), 0);
    }

    #[test]
    fn test_function_array_param_decays() {
        let mut t = TypeTable::new();
        let f = t.function(TypeTable::VOID);
        let arr = t.array_of(TypeTable::CHAR, 10);
        t.add_member(f, Some("buf"), arr);
        let p = t.member(f, 0).ty;
        assert!(t.is_pointer(p));
        assert_eq!(t.deref(p), TypeTable::CHAR);
    }

    #[test]
    fn test_vararg_flag() {
        let mut t = TypeTable::new();
        let f = t.function(TypeTable::INT);
        t.add_member(f, Some("fmt"), TypeTable::INT);
        assert!(!t.is_vararg(f));
        t.add_member(f, Some(ELLIPSIS), TypeTable::VOID);
        assert!(t.is_vararg(f));
        assert_eq!(t.nmembers(f), 1);
    }

    #[test]
    fn test_tagged_copy_identity() {
        let mut t = TypeTable::new();
        let s = t.struct_type();
        t.add_member(s, Some("x"), TypeTable::INT);
        let a = t.tagged_copy(s, "point");
        let b = t.tagged_copy(s, "point");
        assert!(t.is_tagged(a));
        assert!(t.equal(a, b));
        assert_eq!(t.size_of(a), t.size_of(s));
        assert_eq!(t.nmembers(a), 1);
        // Qualifying one alias leaves the definition untouched.
        t.set_qualifiers(a, Qualifiers::CONST);
        assert!(t.is_const(a));
        assert!(!t.is_const(s));
        assert!(!t.is_const(b));
    }

    #[test]
    fn test_equal_reflexive_symmetric() {
        let mut t = TypeTable::new();
        let p1 = t.pointer_to(TypeTable::INT);
        let p2 = t.pointer_to(TypeTable::INT);
        let pc = t.pointer_to(TypeTable::CHAR);
        assert!(t.equal(p1, p1));
        assert!(t.equal(p1, p2));
        assert!(t.equal(p2, p1));
        assert!(!t.equal(p1, pc));
        assert!(t.compatible(p1, p2));
    }

    #[test]
    fn test_equal_ignores_qualifiers() {
        let mut t = TypeTable::new();
        let q = t.clone_node(TypeTable::INT);
        t.set_qualifiers(q, Qualifiers::CONST);
        assert!(t.equal(q, TypeTable::INT));
    }

    #[test]
    fn test_promotion_table() {
        let mut t = TypeTable::new();
        assert_eq!(
            t.usual_arithmetic_conversion(TypeTable::CHAR, TypeTable::CHAR),
            TypeTable::INT
        );
        assert_eq!(
            t.usual_arithmetic_conversion(TypeTable::USHORT, TypeTable::INT),
            TypeTable::INT
        );
        assert_eq!(
            t.usual_arithmetic_conversion(TypeTable::UINT, TypeTable::LONG),
            TypeTable::LONG
        );
        // Ties on width favor unsigned.
        assert_eq!(
            t.usual_arithmetic_conversion(TypeTable::UINT, TypeTable::INT),
            TypeTable::UINT
        );
        assert_eq!(
            t.usual_arithmetic_conversion(TypeTable::LONG, TypeTable::ULONG),
            TypeTable::ULONG
        );
    }

    #[test]
    fn test_promotion_strips_qualifiers() {
        let mut t = TypeTable::new();
        let q = t.clone_node(TypeTable::LONG);
        t.set_qualifiers(q, Qualifiers::CONST);
        let r = t.usual_arithmetic_conversion(q, TypeTable::INT);
        assert!(t.qualifiers(r).is_empty());
        assert_eq!(t.size_of(r), 8);
    }

    #[test]
    fn test_display_roundtrip_shapes() {
        let mut t = TypeTable::new();
        let p = t.pointer_to(TypeTable::CHAR);
        assert_eq!(t.display(p).to_string(), "* char");
        let a = t.array_of(TypeTable::INT, 4);
        assert_eq!(t.display(a).to_string(), "[4] int");
        let f = t.function(TypeTable::INT);
        t.add_member(f, Some("a"), TypeTable::INT);
        t.add_member(f, Some(ELLIPSIS), TypeTable::VOID);
        assert_eq!(t.display(f).to_string(), "(int, ...) -> int");
    }
}
