//! Declarations, declarators and initializers.
//!
//! Covers external declarations, function definitions, and local
//! declarations with optional initialization code. Declaration specifiers
//! accumulate into a compact bitset mapped to one canonical basic type;
//! declarators are parsed inside-out, splicing nested chains like
//! `void (*f)(int)` by walking the inner chain to its tail.

use super::{p, Parser};
use crate::error::{CompileError, CompileResult};
use crate::eval;
use crate::ir::{BlockId, Definition, Var, VarKind};
use crate::lexer::TokenKind;
use crate::symtab::{Linkage, Space, SymbolId, SymbolKind};
use crate::types::{Qualifiers, TypeId, TypeKind, TypeTable, ELLIPSIS};

pub(crate) struct DeclSpec {
    pub ty: TypeId,
    pub storage: Option<TokenKind>,
}

// Specifier bits, combined per the C89 grammar and mapped to one basic type.
const S_VOID: u16 = 0x001;
const S_CHAR: u16 = 0x002;
const S_SHORT: u16 = 0x004;
const S_INT: u16 = 0x008;
const S_SIGNED: u16 = 0x010;
const S_UNSIGNED: u16 = 0x020;
const S_LONG: u16 = 0x040;
const S_LONG_LONG: u16 = 0x080;
const S_FLOAT: u16 = 0x100;
const S_DOUBLE: u16 = 0x200;

fn basic_type_from_specifier(spec: u16) -> Option<TypeId> {
    let ty = match spec {
        0x0001 => TypeTable::VOID,
        0x0002 | 0x0012 => TypeTable::CHAR,
        0x0022 => TypeTable::UCHAR,
        0x0004 | 0x0014 | 0x000C | 0x001C => TypeTable::SHORT,
        0x0024 | 0x002C => TypeTable::USHORT,
        0x0008 | 0x0010 | 0x0018 => TypeTable::INT,
        0x0020 | 0x0028 => TypeTable::UINT,
        0x0040 | 0x0050 | 0x0048 | 0x0058 | 0x00C0 | 0x00D0 | 0x00D8 => TypeTable::LONG,
        0x0060 | 0x0068 | 0x00E0 | 0x00E8 => TypeTable::ULONG,
        0x0100 => TypeTable::FLOAT,
        0x0200 | 0x0240 => TypeTable::DOUBLE,
        _ => return None,
    };
    Some(ty)
}

impl Parser {
    /// Parse type specifiers, qualifiers and (when accepted) a storage
    /// class. At least one type specifier is required; there is no implicit
    /// int.
    pub(crate) fn declaration_specifiers(
        &mut self,
        want_storage: bool,
    ) -> CompileResult<DeclSpec> {
        let mut spec: u16 = 0;
        let mut qual = Qualifiers::NONE;
        let mut storage: Option<TokenKind> = None;
        let mut ty: Option<TypeId> = None;

        loop {
            let tok = self.ts.peek().clone();
            let bit = match tok.kind {
                TokenKind::Void => Some(S_VOID),
                TokenKind::Char => Some(S_CHAR),
                TokenKind::Short => Some(S_SHORT),
                TokenKind::Int => Some(S_INT),
                TokenKind::Signed => Some(S_SIGNED),
                TokenKind::Unsigned => Some(S_UNSIGNED),
                TokenKind::Long => {
                    if spec & S_LONG != 0 {
                        Some(S_LONG_LONG)
                    } else {
                        Some(S_LONG)
                    }
                }
                TokenKind::Float => Some(S_FLOAT),
                TokenKind::Double => Some(S_DOUBLE),
                TokenKind::Const => {
                    if qual.contains(Qualifiers::CONST) {
                        return Err(CompileError::Specifiers {
                            message: "duplicate type qualifier 'const'".into(),
                            loc: tok.loc,
                        });
                    }
                    qual.insert(Qualifiers::CONST);
                    self.ts.next();
                    continue;
                }
                TokenKind::Volatile => {
                    if qual.contains(Qualifiers::VOLATILE) {
                        return Err(CompileError::Specifiers {
                            message: "duplicate type qualifier 'volatile'".into(),
                            loc: tok.loc,
                        });
                    }
                    qual.insert(Qualifiers::VOLATILE);
                    self.ts.next();
                    continue;
                }
                TokenKind::Identifier => {
                    let id = self.sess.syms.lookup(Space::Ident, &tok.text);
                    match id {
                        Some(id)
                            if self.sess.syms.get(id).kind == SymbolKind::Typedef
                                && ty.is_none()
                                && spec == 0 =>
                        {
                            self.ts.next();
                            let aliased = self.sess.syms.get(id).ty;
                            ty = Some(self.sess.types.clone_node(aliased));
                            continue;
                        }
                        _ => break,
                    }
                }
                TokenKind::Struct | TokenKind::Union => {
                    if ty.is_some() {
                        break;
                    }
                    ty = Some(self.struct_or_union_declaration()?);
                    continue;
                }
                TokenKind::Enum => {
                    if ty.is_some() {
                        break;
                    }
                    ty = Some(self.enum_declaration()?);
                    continue;
                }
                TokenKind::Auto
                | TokenKind::Register
                | TokenKind::Static
                | TokenKind::Extern
                | TokenKind::Typedef => {
                    if !want_storage {
                        return Err(CompileError::Specifiers {
                            message: "unexpected storage class in qualifier list".into(),
                            loc: tok.loc,
                        });
                    }
                    if storage.is_some() {
                        return Err(CompileError::Specifiers {
                            message: "multiple storage class specifiers".into(),
                            loc: tok.loc,
                        });
                    }
                    storage = Some(tok.kind);
                    self.ts.next();
                    continue;
                }
                _ => break,
            };

            if let Some(bit) = bit {
                if spec & bit != 0 {
                    return Err(CompileError::Specifiers {
                        message: format!("duplicate type specifier {}", tok.kind),
                        loc: tok.loc,
                    });
                }
                self.ts.next();
                spec |= bit;
            }
            if ty.is_some() && spec != 0 {
                return Err(CompileError::Specifiers {
                    message: "invalid combination of declaration specifiers".into(),
                    loc: tok.loc,
                });
            }
        }

        let ty = if let Some(ty) = ty {
            if qual.intersects(self.sess.types.qualifiers(ty)) {
                return Err(CompileError::Specifiers {
                    message: "duplicate type qualifier".into(),
                    loc: self.here(),
                });
            }
            ty
        } else if spec != 0 {
            basic_type_from_specifier(spec).ok_or_else(|| CompileError::Specifiers {
                message: "invalid type specification".into(),
                loc: self.here(),
            })?
        } else {
            return Err(CompileError::Specifiers {
                message: "missing type specifier".into(),
                loc: self.here(),
            });
        };

        let ty = if qual.is_empty() {
            ty
        } else {
            let mut merged = self.sess.types.qualifiers(ty);
            merged.insert(qual);
            let fresh = self.sess.types.clone_node(ty);
            self.sess.types.set_qualifiers(fresh, merged);
            fresh
        };
        Ok(DeclSpec { ty, storage })
    }

    fn struct_or_union_declaration(&mut self) -> CompileResult<TypeId> {
        let kind = if self.ts.next().kind == TokenKind::Struct {
            TypeKind::Struct
        } else {
            TypeKind::Union
        };

        let mut tag: Option<(SymbolId, String)> = None;
        let mut ty: Option<TypeId> = None;

        if self.ts.peek().kind == TokenKind::Identifier {
            let tok = self.ts.consume(TokenKind::Identifier)?;
            let name = tok.text;
            match self.sess.syms.lookup(Space::Tag, &name) {
                None => {
                    let t = if kind == TypeKind::Struct {
                        self.sess.types.struct_type()
                    } else {
                        self.sess.types.union_type()
                    };
                    let sym =
                        self.sess
                            .syms
                            .add(Space::Tag, &name, t, SymbolKind::Typedef, Linkage::None);
                    tag = Some((sym, name));
                    ty = Some(t);
                }
                Some(sym) => {
                    let sty = self.sess.syms.get(sym).ty;
                    if self.sess.types.is_integer(sty) {
                        return Err(CompileError::semantic(
                            format!("tag '{}' was previously declared as enum", name),
                            tok.loc,
                        ));
                    }
                    if self.sess.types.kind(sty) != kind {
                        let was = if self.sess.types.kind(sty) == TypeKind::Struct {
                            "struct"
                        } else {
                            "union"
                        };
                        return Err(CompileError::semantic(
                            format!("tag '{}' was previously declared as {}", name, was),
                            tok.loc,
                        ));
                    }
                    if self.ts.peek().kind == p('{') && self.sess.types.size_of(sty) != 0 {
                        return Err(CompileError::semantic(
                            format!("redefinition of '{}'", name),
                            tok.loc,
                        ));
                    }
                    tag = Some((sym, name));
                    ty = Some(sty);
                }
            }
        }

        if self.ts.peek().kind == p('{') {
            let t = match ty {
                Some(t) => t,
                None => {
                    // Anonymous aggregate: a standalone type with no tag
                    // entry.
                    let t = if kind == TypeKind::Struct {
                        self.sess.types.struct_type()
                    } else {
                        self.sess.types.union_type()
                    };
                    ty = Some(t);
                    t
                }
            };
            self.ts.consume(p('{'))?;
            self.member_declaration_list(t)?;
            self.ts.consume(p('}'))?;
        }

        let ty = ty.ok_or_else(|| self.err("expected struct or union body or tag"))?;
        // Hand back a tagged alias so qualifiers never touch the definition.
        match tag {
            Some((_, name)) => Ok(self.sess.types.tagged_copy(ty, &name)),
            None => Ok(ty),
        }
    }

    fn member_declaration_list(&mut self, ty: TypeId) -> CompileResult<()> {
        loop {
            let base = self.declaration_specifiers(false)?;
            loop {
                let loc = self.here();
                let (mty, name) = self.declarator(Some(base.ty))?;
                let mty = mty.ok_or_else(|| self.err("expected member declarator"))?;
                let name = name.ok_or_else(|| {
                    CompileError::semantic("missing name in member declarator", loc)
                })?;
                if self.sess.types.size_of(mty) == 0 {
                    return Err(CompileError::semantic(
                        format!(
                            "field '{}' has incomplete type '{}'",
                            name,
                            self.sess.types.display(mty)
                        ),
                        loc,
                    ));
                }
                if self.sess.types.find_member(ty, &name).is_some() {
                    return Err(CompileError::semantic(
                        format!("duplicate member '{}'", name),
                        loc,
                    ));
                }
                self.sess.types.add_member(ty, Some(&name), mty);
                if !self.ts.try_consume(p(',')) {
                    break;
                }
            }
            self.ts.consume(p(';'))?;
            if self.ts.peek().kind == p('}') {
                return Ok(());
            }
        }
    }

    fn enum_declaration(&mut self) -> CompileResult<TypeId> {
        self.ts.consume(TokenKind::Enum)?;
        if self.ts.peek().kind == TokenKind::Identifier {
            let tok = self.ts.consume(TokenKind::Identifier)?;
            let name = tok.text;
            let tag = match self.sess.syms.lookup(Space::Tag, &name) {
                Some(sym)
                    if self.sess.syms.get(sym).depth
                        >= self.sess.syms.current_depth(Space::Tag) =>
                {
                    if !self.sess.types.is_integer(self.sess.syms.get(sym).ty) {
                        return Err(CompileError::semantic(
                            format!("tag '{}' was previously defined as aggregate type", name),
                            tok.loc,
                        ));
                    }
                    sym
                }
                _ => self.sess.syms.add(
                    Space::Tag,
                    &name,
                    TypeTable::INT,
                    SymbolKind::Typedef,
                    Linkage::None,
                ),
            };
            // enum_value doubles as the definition sentinel for the tag.
            if self.ts.peek().kind == p('{') {
                if self.sess.syms.get(tag).enum_value != 0 {
                    return Err(CompileError::semantic(
                        format!("redefinition of enum '{}'", name),
                        tok.loc,
                    ));
                }
                self.enumerator_list()?;
                self.sess.syms.get_mut(tag).enum_value = 1;
            }
        } else {
            self.enumerator_list()?;
        }
        // All enums are plain int; no further type checking is done.
        Ok(TypeTable::INT)
    }

    fn enumerator_list(&mut self) -> CompileResult<()> {
        let mut value: i64 = 0;
        self.ts.consume(p('{'))?;
        loop {
            let tok = self.ts.consume(TokenKind::Identifier)?;
            if self.ts.try_consume(p('=')) {
                let v = self.constant_expression()?;
                if !self.sess.types.is_integer(v.ty) {
                    return Err(CompileError::semantic(
                        "implicit conversion from non-integer type in enum",
                        tok.loc,
                    ));
                }
                value = v.imm;
            }
            let sym = self.sess.syms.add(
                Space::Ident,
                &tok.text,
                TypeTable::INT,
                SymbolKind::EnumValue,
                Linkage::None,
            );
            self.sess.syms.get_mut(sym).enum_value = value;
            value += 1;
            if !self.ts.try_consume(p(',')) {
                break;
            }
            if self.ts.peek().kind == p('}') {
                break;
            }
        }
        self.ts.consume(p('}'))?;
        Ok(())
    }

    /// declarator: pointer* direct-declarator
    pub(crate) fn declarator(
        &mut self,
        mut base: Option<TypeId>,
    ) -> CompileResult<(Option<TypeId>, Option<String>)> {
        while self.ts.peek().kind == p('*') {
            base = Some(self.pointer(base)?);
        }
        self.direct_declarator(base)
    }

    fn pointer(&mut self, base: Option<TypeId>) -> CompileResult<TypeId> {
        self.ts.consume(p('*'))?;
        let ty = self.sess.types.pointer_to_opt(base);
        let mut qual = Qualifiers::NONE;
        loop {
            let which = match self.ts.peek().kind {
                TokenKind::Const => Qualifiers::CONST,
                TokenKind::Volatile => Qualifiers::VOLATILE,
                _ => break,
            };
            if qual.contains(which) {
                return Err(CompileError::Specifiers {
                    message: "duplicate type qualifier".into(),
                    loc: self.here(),
                });
            }
            qual.insert(which);
            self.ts.next();
        }
        self.sess.types.set_qualifiers(ty, qual);
        Ok(ty)
    }

    /// Array suffixes `[s0][s1]..[sn]`, right-associative. Only the
    /// outermost dimension may be unspecified, yielding an incomplete type.
    fn direct_declarator_array(
        &mut self,
        base: Option<TypeId>,
    ) -> CompileResult<Option<TypeId>> {
        if self.ts.peek().kind != p('[') {
            return Ok(base);
        }
        let loc = self.here();
        self.ts.consume(p('['))?;
        let mut length: u32 = 0;
        if self.ts.peek().kind != p(']') {
            let v = self.constant_expression()?;
            if !self.sess.types.is_integer(v.ty) || v.imm < 1 {
                return Err(CompileError::semantic(
                    "array dimension must be a natural number",
                    loc,
                ));
            }
            length = v.imm as u32;
        }
        self.ts.consume(p(']'))?;

        let base = self.direct_declarator_array(base)?;
        let elem = match base {
            Some(elem) if self.sess.types.size_of(elem) != 0 => elem,
            _ => {
                return Err(CompileError::semantic(
                    "array has incomplete element type",
                    loc,
                ))
            }
        };
        Ok(Some(self.sess.types.array_of(elem, length)))
    }

    /// `FOLLOW(parameter-list) = { ')' }`; a lone `void` means an empty
    /// list, and `...` after at least one parameter sets the variadic flag.
    fn parameter_list(&mut self, base: Option<TypeId>) -> CompileResult<TypeId> {
        let ret = base.ok_or_else(|| self.err("function declarator without return type"))?;
        let func = self.sess.types.function(ret);

        while self.ts.peek().kind != p(')') {
            let loc = self.here();
            let spec = self.declaration_specifiers(false)?;
            let (ty, name) = self.declarator(Some(spec.ty))?;
            let ty = ty.ok_or_else(|| self.err("expected parameter declarator"))?;
            if self.sess.types.is_void(ty) {
                if self.sess.types.nmembers(func) != 0 {
                    return Err(CompileError::semantic(
                        "incomplete type in parameter list",
                        loc,
                    ));
                }
                break;
            }
            self.sess.types.add_member(func, name.as_deref(), ty);
            if self.ts.peek().kind != p(',') {
                break;
            }
            self.ts.consume(p(','))?;
            if self.ts.peek().kind == p(')') {
                return Err(self.err("unexpected trailing comma in parameter list"));
            }
            if self.ts.peek().kind == TokenKind::Dots {
                self.ts.consume(TokenKind::Dots)?;
                self.sess.types.add_member(func, Some(ELLIPSIS), TypeTable::VOID);
                break;
            }
        }
        Ok(func)
    }

    /// Handles identifier, parenthesized sub-declarators and the `[n]` and
    /// `(params)` suffixes. Nested declarators are stitched by walking the
    /// inner chain to its tail and splicing the outer suffix there.
    fn direct_declarator(
        &mut self,
        mut base: Option<TypeId>,
    ) -> CompileResult<(Option<TypeId>, Option<String>)> {
        let mut ty = base;
        let mut name: Option<String> = None;
        let mut head: Option<TypeId> = None;
        let mut tail: Option<TypeId> = None;

        match self.ts.peek().kind {
            TokenKind::Identifier => {
                name = Some(self.ts.consume(TokenKind::Identifier)?.text);
            }
            TokenKind::Punct('(') => {
                self.ts.consume(p('('))?;
                let (inner, inner_name) = self.declarator(None)?;
                self.ts.consume(p(')'))?;
                name = inner_name;
                if let Some(inner) = inner {
                    head = Some(inner);
                    tail = Some(self.sess.types.chain_tail(inner));
                    ty = Some(inner);
                }
            }
            _ => {}
        }

        while matches!(self.ts.peek().kind, TokenKind::Punct('[') | TokenKind::Punct('(')) {
            let suffix = match self.ts.peek().kind {
                TokenKind::Punct('[') => self
                    .direct_declarator_array(base)?
                    .expect("array suffix always yields a type"),
                _ => {
                    self.ts.consume(p('('))?;
                    let f = self.parameter_list(base)?;
                    self.ts.consume(p(')'))?;
                    f
                }
            };
            ty = Some(suffix);
            if let (Some(t), Some(h)) = (tail, head) {
                self.sess.types.set_next(t, suffix);
                ty = Some(h);
            }
            base = ty;
        }

        Ok((ty, name))
    }

    /// Symbol insertion with same-scope redeclaration handling.
    fn declare_symbol(
        &mut self,
        name: &str,
        ty: TypeId,
        kind: SymbolKind,
        linkage: Linkage,
        loc: crate::lexer::SourceLocation,
    ) -> CompileResult<SymbolId> {
        let depth = self.sess.syms.current_depth(Space::Ident);
        if let Some(existing) = self.sess.syms.lookup(Space::Ident, name) {
            let e = self.sess.syms.get(existing);
            if e.depth == depth
                && !matches!(e.kind, SymbolKind::Label | SymbolKind::EnumValue)
            {
                if !self.sess.types.compatible(e.ty, ty) {
                    return Err(CompileError::semantic(
                        format!("conflicting types for '{}'", name),
                        loc,
                    ));
                }
                if depth > 0 && linkage == Linkage::None && e.linkage == Linkage::None {
                    return Err(CompileError::semantic(
                        format!("redefinition of '{}'", name),
                        loc,
                    ));
                }
                // Re-declaration of an external: keep the stable symbol and
                // upgrade the binding kind where it grows stronger.
                if kind == SymbolKind::Definition
                    || (kind == SymbolKind::Tentative && e.kind == SymbolKind::Declaration)
                {
                    self.sess.syms.get_mut(existing).kind = kind;
                }
                return Ok(existing);
            }
        }
        Ok(self.sess.syms.add(Space::Ident, name, ty, kind, linkage))
    }

    /// C99 6.4.2.2: `static const char __func__[] = "name";`
    fn define_builtin_func(&mut self, name: &str) {
        debug_assert!(self.sess.syms.current_depth(Space::Ident) == 1);
        let ty = self
            .sess
            .types
            .array_of(TypeTable::CHAR, name.len() as u32 + 1);
        let sym = self.sess.syms.add(
            Space::Ident,
            "__func__",
            ty,
            SymbolKind::StringValue,
            Linkage::Intern,
        );
        self.sess.syms.get_mut(sym).string_value = Some(name.to_string());
    }

    /// External declaration at file scope. Definitions it produces are
    /// buffered for [`Parser::parse`].
    pub(crate) fn external_declaration(&mut self) -> CompileResult<()> {
        self.declaration_body(None).map(|_| ())
    }

    /// Declaration inside a function body, with optional initialization
    /// code emitted into the current block.
    pub(crate) fn local_declaration(
        &mut self,
        def: &mut Definition,
        block: BlockId,
    ) -> CompileResult<BlockId> {
        let out = self.declaration_body(Some((def, block)))?;
        Ok(out.unwrap_or(block))
    }

    fn declaration_body(
        &mut self,
        mut local: Option<(&mut Definition, BlockId)>,
    ) -> CompileResult<Option<BlockId>> {
        let spec = self.declaration_specifiers(true)?;
        let depth = self.sess.syms.current_depth(Space::Ident);
        let (kind, linkage) = match spec.storage {
            Some(TokenKind::Extern) => (SymbolKind::Declaration, Linkage::Extern),
            Some(TokenKind::Static) => (SymbolKind::Tentative, Linkage::Intern),
            Some(TokenKind::Typedef) => (SymbolKind::Typedef, Linkage::None),
            _ => {
                if depth == 0 {
                    (SymbolKind::Tentative, Linkage::Extern)
                } else {
                    (SymbolKind::Definition, Linkage::None)
                }
            }
        };

        loop {
            let loc = self.here();
            let (ty, name) = self.declarator(Some(spec.ty))?;
            let name = match name {
                Some(name) => name,
                None => {
                    // Plain `struct x { ... };` and the like.
                    self.ts.consume(p(';'))?;
                    return Ok(local.map(|(_, b)| b));
                }
            };
            let ty = ty.ok_or_else(|| self.err("expected declarator"))?;

            // Functions declared without storage class are declarations, not
            // tentative objects.
            let kind = if self.sess.types.is_function(ty) && kind == SymbolKind::Tentative {
                SymbolKind::Declaration
            } else {
                kind
            };

            let sym = self.declare_symbol(&name, ty, kind, linkage, loc)?;
            if depth > 0 && kind == SymbolKind::Definition {
                if let Some((def, _)) = local.as_mut() {
                    def.locals.push(sym);
                }
            }

            match self.ts.peek().kind {
                TokenKind::Punct(';') => {
                    self.ts.consume(p(';'))?;
                    return Ok(local.map(|(_, b)| b));
                }
                TokenKind::Punct('=') => {
                    if self.sess.syms.get(sym).kind == SymbolKind::Declaration {
                        return Err(CompileError::semantic(
                            format!("extern symbol '{}' cannot be initialized", name),
                            loc,
                        ));
                    }
                    if self.sess.syms.get(sym).kind == SymbolKind::Typedef {
                        return Err(CompileError::semantic(
                            "typedef cannot be initialized",
                            loc,
                        ));
                    }
                    if depth == 0
                        && self.sess.syms.get(sym).kind == SymbolKind::Definition
                    {
                        return Err(CompileError::semantic(
                            format!("symbol '{}' was already defined", name),
                            loc,
                        ));
                    }
                    self.ts.consume(p('='))?;
                    self.sess.syms.get_mut(sym).kind = SymbolKind::Definition;
                    let target_ty = self.sess.syms.get(sym).ty;
                    if self.sess.syms.get(sym).linkage == Linkage::None {
                        let (def, block) = local
                            .as_mut()
                            .ok_or_else(|| self.err("initializer outside function"))?;
                        let target = Var::direct(sym, target_ty);
                        let out = self.initializer(def, *block, target)?;
                        *block = out;
                    } else {
                        // Static storage: the initializer becomes its own
                        // buffered definition.
                        let mut obj = Definition::new(sym, &mut self.sess.syms);
                        let body = obj.body;
                        let target = Var::direct(sym, target_ty);
                        self.initializer(&mut obj, body, target)?;
                        self.defs.push_back(obj);
                    }
                    if self.sess.types.size_of(self.sess.syms.get(sym).ty) == 0 {
                        return Err(CompileError::semantic(
                            format!("definition of '{}' has incomplete type", name),
                            loc,
                        ));
                    }
                    if self.ts.peek().kind != p(',') {
                        self.ts.consume(p(';'))?;
                        return Ok(local.map(|(_, b)| b));
                    }
                }
                TokenKind::Punct('{') => {
                    if !self.sess.types.is_function(ty) || depth != 0 {
                        return Err(CompileError::semantic(
                            "invalid function definition",
                            loc,
                        ));
                    }
                    debug_assert!(local.is_none());
                    debug_assert!(self.sess.syms.get(sym).linkage != Linkage::None);
                    self.sess.syms.get_mut(sym).kind = SymbolKind::Definition;
                    self.function_definition(sym)?;
                    return Ok(None);
                }
                _ => {}
            }
            self.ts.consume(p(','))?;
        }
    }

    fn function_definition(&mut self, sym: SymbolId) -> CompileResult<()> {
        let fname = self.sess.syms.get(sym).name.clone();
        let fty = self.sess.syms.get(sym).ty;
        let mut def = Definition::new(sym, &mut self.sess.syms);

        self.sess.syms.push_scope(Space::Ident);
        self.define_builtin_func(&fname);

        for i in 0..self.sess.types.nmembers(fty) {
            let member = self.sess.types.member(fty, i).clone();
            let pname = member.name.ok_or_else(|| {
                self.err(format!("missing parameter name at position {}", i + 1))
            })?;
            let psym = self.sess.syms.add(
                Space::Ident,
                &pname,
                member.ty,
                SymbolKind::Definition,
                Linkage::None,
            );
            def.params.push(psym);
        }

        self.labels.clear();
        self.pending_gotos.clear();
        self.current_return = Some(self.sess.types.return_type(fty));

        let body = def.body;
        self.compound_statement(&mut def, body)?;

        // Patch forward gotos now that every label is known.
        let pending = std::mem::take(&mut self.pending_gotos);
        for (label, from, loc) in pending {
            let target = self.labels.get(&label).copied().ok_or_else(|| {
                CompileError::semantic(format!("use of undeclared label '{}'", label), loc)
            })?;
            def.block_mut(from).terminator = crate::ir::Terminator::Jump(target);
        }

        self.sess.syms.pop_scope(Space::Ident);
        self.current_return = None;
        self.defs.push_back(def);
        Ok(())
    }

    /// Parse and emit initializer code for a target variable. Scalar targets
    /// accept an assignment expression; aggregates a brace-enclosed list.
    fn initializer(
        &mut self,
        def: &mut Definition,
        block: BlockId,
        mut target: Var,
    ) -> CompileResult<BlockId> {
        debug_assert!(target.kind == VarKind::Direct);
        // cv-qualifiers play no role in initialization.
        target.ty = self.sess.types.unwrapped(target.ty);

        if self.ts.peek().kind == p('{') {
            return self.object_initializer(def, block, target);
        }

        let loc = self.here();
        let block = self.assignment_expression(def, block)?;
        let v = def.block(block).expr.expect("initializer expression");
        let static_storage = self
            .sess
            .syms
            .get(target.symbol.unwrap())
            .linkage
            != Linkage::None;
        if static_storage && !v.is_immediate() {
            return Err(CompileError::semantic(
                "initializer must be computable at load time",
                loc,
            ));
        }
        if self.sess.types.size_of(target.ty) == 0 {
            // Completion from a string literal; evaluation does not have the
            // context to do this itself.
            let is_string = v.kind == VarKind::Immediate
                && v.symbol
                    .map(|s| self.sess.syms.get(s).kind == SymbolKind::StringValue)
                    .unwrap_or(false)
                && self.sess.types.is_array(v.ty);
            if !is_string || !self.sess.types.is_array(target.ty) {
                return Err(CompileError::semantic(
                    "invalid initializer for incomplete type",
                    loc,
                ));
            }
            debug_assert!(target.offset == 0);
            let size = self.sess.types.size_of(v.ty);
            self.sess.types.complete_array(target.ty, size);
        }
        eval::eval_assign(&mut self.sess, def, block, target, v).map_err(|e| e.at(loc))?;
        Ok(block)
    }

    fn object_initializer(
        &mut self,
        def: &mut Definition,
        block: BlockId,
        mut target: Var,
    ) -> CompileResult<BlockId> {
        let filled = target.offset;
        let ty = target.ty;
        debug_assert!(!self.sess.types.is_tagged(ty));

        let loc = self.here();
        self.ts.consume(p('{'))?;
        let mut block = block;
        target.lvalue = true;

        match self.sess.types.kind(ty) {
            TypeKind::Union => {
                // Only the first member initializes; pre-zero the whole
                // union when the first member leaves padding.
                if self.sess.types.nmembers(ty) == 0 {
                    return Err(CompileError::semantic("initializer for empty union", loc));
                }
                let first = self.sess.types.member(ty, 0).clone();
                let size = self.sess.types.size_of(ty);
                if self.sess.types.size_of(first.ty) < size {
                    let fill_ty = if size % 8 != 0 {
                        self.sess.types.array_of(TypeTable::CHAR, size)
                    } else {
                        self.sess.types.array_of(TypeTable::LONG, size / 8)
                    };
                    let fill = Var {
                        ty: fill_ty,
                        ..target
                    };
                    self.zero_initialize(def, block, fill)?;
                }
                let t = Var {
                    ty: first.ty,
                    ..target
                };
                block = self.initializer(def, block, t)?;
                if self.ts.peek().kind != p('}') {
                    return Err(CompileError::semantic(
                        "excess elements in union initializer",
                        loc,
                    ));
                }
            }
            TypeKind::Struct => {
                let n = self.sess.types.nmembers(ty);
                let mut i = 0;
                while i < n {
                    let member = self.sess.types.member(ty, i).clone();
                    let t = Var {
                        ty: member.ty,
                        offset: filled + member.offset as i32,
                        ..target
                    };
                    block = self.initializer(def, block, t)?;
                    i += 1;
                    if !self.ts.try_consume(p(',')) {
                        break;
                    }
                    if self.ts.peek().kind == p('}') {
                        break;
                    }
                }
                // Omitted trailing members are zero-filled.
                while i < n {
                    let member = self.sess.types.member(ty, i).clone();
                    let t = Var {
                        ty: member.ty,
                        offset: filled + member.offset as i32,
                        ..target
                    };
                    self.zero_initialize(def, block, t)?;
                    i += 1;
                }
            }
            TypeKind::Array => {
                let elem = self.sess.types.next(ty).unwrap();
                let elem_size = self.sess.types.size_of(elem);
                let total = self.sess.types.size_of(ty);
                let count = if total > 0 { total / elem_size } else { 0 };
                let mut i: u32 = 0;
                loop {
                    let t = Var {
                        ty: elem,
                        offset: filled + (i * elem_size) as i32,
                        ..target
                    };
                    block = self.initializer(def, block, t)?;
                    i += 1;
                    if !self.ts.try_consume(p(',')) {
                        break;
                    }
                    if self.ts.peek().kind == p('}') {
                        break;
                    }
                    if count > 0 && i >= count {
                        return Err(CompileError::semantic(
                            "excess elements in array initializer",
                            loc,
                        ));
                    }
                }
                if count == 0 {
                    // Incomplete array at the root of the target type:
                    // complete it in place through the symbol's node.
                    self.sess.types.complete_array(ty, i * elem_size);
                } else {
                    while i < count {
                        let t = Var {
                            ty: elem,
                            offset: filled + (i * elem_size) as i32,
                            ..target
                        };
                        self.zero_initialize(def, block, t)?;
                        i += 1;
                    }
                }
            }
            _ => {
                return Err(CompileError::semantic(
                    "block initializer only applies to aggregate or union type",
                    loc,
                ));
            }
        }

        self.ts.consume(p('}'))?;
        Ok(block)
    }

    /// Set the target to zero with plain assignments on the underlying
    /// scalar fields.
    fn zero_initialize(
        &mut self,
        def: &mut Definition,
        block: BlockId,
        target: Var,
    ) -> CompileResult<()> {
        debug_assert!(target.kind == VarKind::Direct);
        let ty = self.sess.types.unwrapped(target.ty);
        match self.sess.types.kind(ty) {
            TypeKind::Struct | TypeKind::Union => {
                for i in 0..self.sess.types.nmembers(ty) {
                    let member = self.sess.types.member(ty, i).clone();
                    let t = Var {
                        ty: member.ty,
                        offset: target.offset + member.offset as i32,
                        ..target
                    };
                    self.zero_initialize(def, block, t)?;
                }
                Ok(())
            }
            TypeKind::Array => {
                let elem = self.sess.types.next(ty).unwrap();
                let elem_size = self.sess.types.size_of(elem);
                debug_assert!(self.sess.types.size_of(ty) > 0);
                for i in 0..self.sess.types.size_of(ty) / elem_size {
                    let t = Var {
                        ty: elem,
                        offset: target.offset + (i * elem_size) as i32,
                        ..target
                    };
                    self.zero_initialize(def, block, t)?;
                }
                Ok(())
            }
            TypeKind::Pointer => {
                let void_ptr = self.sess.types.pointer_to(TypeTable::VOID);
                let zero = Var::immediate(void_ptr, 0);
                eval::eval_assign(&mut self.sess, def, block, target, zero)
                    .map_err(|e| e.at(self.here()))?;
                Ok(())
            }
            TypeKind::Signed | TypeKind::Unsigned => {
                let size = self.sess.types.size_of(ty);
                let zero = Var::immediate(self.sess.types.integer(true, size), 0);
                eval::eval_assign(&mut self.sess, def, block, target, zero)
                    .map_err(|e| e.at(self.here()))?;
                Ok(())
            }
            _ => Err(CompileError::semantic(
                format!(
                    "invalid type to zero-initialize, was '{}'",
                    self.sess.types.display(target.ty)
                ),
                self.here(),
            )),
        }
    }
}
