//! ELF relocatable object emission.
//!
//! Append-only section buffers with explicit offsets, a text-symbol offset
//! map, and relocation lists. The encoder talks to this module through the
//! [`RelocSink`] trait: relocations are registered against the *current*
//! text offset at the moment their four-byte placeholder is reserved, and
//! forward jump displacements are held in a pending list patched at
//! write-out.
//!
//! The final `ET_REL`/`EM_X86_64` file materializes through the `object`
//! crate's write API.

use crate::error::{CompileError, CompileResult};
use crate::session::Session;
use crate::symtab::{Linkage, SymbolId, SymbolKind};
use crate::x64::encoder::{encode, RelocKind, RelocSink};
use crate::x64::instr::Instruction;
use object::write::{Object, Relocation, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationFlags, SymbolFlags, SymbolScope,
};
use std::collections::HashMap;

struct TextReloc {
    offset: u64,
    sym: SymbolId,
    kind: RelocKind,
    addend: i64,
}

struct DataReloc {
    offset: u64,
    sym: SymbolId,
    addend: i64,
}

struct FuncRecord {
    sym: SymbolId,
    start: u64,
    size: u64,
}

struct DataRecord {
    sym: SymbolId,
    offset: u64,
    size: u64,
    align: u64,
}

struct BssRecord {
    sym: SymbolId,
    size: u64,
    align: u64,
}

/// Pending intra-text displacement patch for a forward reference.
struct PendingDisp {
    field: u64,
    sym: SymbolId,
}

pub struct ElfWriter {
    text: Vec<u8>,
    data: Vec<u8>,
    /// Text offsets of functions and block labels.
    text_offsets: HashMap<SymbolId, u64>,
    funcs: Vec<FuncRecord>,
    objects: Vec<DataRecord>,
    bss: Vec<BssRecord>,
    text_relocs: Vec<TextReloc>,
    data_relocs: Vec<DataReloc>,
    pending: Vec<PendingDisp>,
}

impl RelocSink for ElfWriter {
    fn add_reloc_text(&mut self, sym: SymbolId, kind: RelocKind, instr_offset: usize, addend: i64) {
        self.text_relocs.push(TextReloc {
            offset: self.text.len() as u64 + instr_offset as u64,
            sym,
            kind,
            addend,
        });
    }

    fn text_displacement(&mut self, sym: SymbolId, instr_offset: usize) -> i32 {
        let field = self.text.len() as u64 + instr_offset as u64;
        match self.text_offsets.get(&sym) {
            Some(&target) => (target as i64 - field as i64) as i32,
            None => {
                self.pending.push(PendingDisp { field, sym });
                0
            }
        }
    }
}

impl ElfWriter {
    pub fn new() -> Self {
        ElfWriter {
            text: Vec::new(),
            data: Vec::new(),
            text_offsets: HashMap::new(),
            funcs: Vec::new(),
            objects: Vec::new(),
            bss: Vec::new(),
            text_relocs: Vec::new(),
            data_relocs: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn text_len(&self) -> u64 {
        self.text.len() as u64
    }

    /// Encode one instruction and append its bytes to the text section.
    pub fn emit(&mut self, instr: &Instruction) {
        let code = encode(instr, self);
        self.text.extend_from_slice(code.as_slice());
    }

    /// Record the current text offset as the address of a label or function
    /// symbol.
    pub fn place_label(&mut self, sym: SymbolId) {
        self.text_offsets.insert(sym, self.text.len() as u64);
    }

    /// Begin a function: align the text cursor and place the symbol.
    pub fn begin_function(&mut self, sym: SymbolId) {
        while self.text.len() % 16 != 0 {
            self.text.push(0x90);
        }
        let start = self.text.len() as u64;
        self.place_label(sym);
        self.funcs.push(FuncRecord {
            sym,
            start,
            size: 0,
        });
        log::debug!("function #{} starts at text offset {:#x}", sym.0, start);
    }

    /// Finish the most recently begun function, fixing its size.
    pub fn end_function(&mut self) {
        let end = self.text.len() as u64;
        let func = self.funcs.last_mut().expect("no open function");
        func.size = end - func.start;
        log::debug!("function #{} is {} bytes", func.sym.0, func.size);
    }

    /// Append an initialized object to the data section.
    pub fn add_data_object(&mut self, sym: SymbolId, bytes: &[u8], align: u64) {
        while (self.data.len() as u64) % align != 0 {
            self.data.push(0);
        }
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        self.objects.push(DataRecord {
            sym,
            offset,
            size: bytes.len() as u64,
            align,
        });
    }

    /// Register an absolute 64-bit relocation inside the most recently
    /// added data object.
    pub fn add_data_reloc(&mut self, object_offset: u64, sym: SymbolId, addend: i64) {
        let base = self.objects.last().expect("no data object").offset;
        self.data_relocs.push(DataReloc {
            offset: base + object_offset,
            sym,
            addend,
        });
    }

    /// Reserve zero-initialized storage for a tentative definition.
    pub fn add_bss_object(&mut self, sym: SymbolId, size: u64, align: u64) {
        self.bss.push(BssRecord { sym, size, align });
    }

    /// Resolve pending forward displacements. The existing field value
    /// (immediate-width adjustment and addend) is preserved by adding the
    /// distance on top.
    fn patch_pending(&mut self) -> CompileResult<()> {
        let pending = std::mem::take(&mut self.pending);
        for p in pending {
            let target = *self.text_offsets.get(&p.sym).ok_or_else(|| {
                CompileError::ObjectWrite {
                    reason: format!("undefined text label #{}", p.sym.0),
                }
            })?;
            let i = p.field as usize;
            let existing = i32::from_le_bytes(self.text[i..i + 4].try_into().unwrap());
            let value = existing.wrapping_add((target as i64 - p.field as i64) as i32);
            self.text[i..i + 4].copy_from_slice(&value.to_le_bytes());
        }
        Ok(())
    }

    fn scope_for(linkage: Linkage) -> SymbolScope {
        match linkage {
            Linkage::Intern => SymbolScope::Compilation,
            _ => SymbolScope::Linkage,
        }
    }

    /// Build the `ET_REL` object file.
    pub fn finish(mut self, sess: &Session) -> CompileResult<Vec<u8>> {
        self.patch_pending()?;

        let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let text = obj.section_id(object::write::StandardSection::Text);
        let data = obj.section_id(object::write::StandardSection::Data);
        let bss = obj.section_id(object::write::StandardSection::UninitializedData);

        obj.append_section_data(text, &self.text, 16);
        obj.append_section_data(data, &self.data, 8);

        let mut ids: HashMap<SymbolId, object::write::SymbolId> = HashMap::new();

        for func in &self.funcs {
            let sym = sess.syms.get(func.sym);
            let id = obj.add_symbol(Symbol {
                name: sym.name.as_bytes().to_vec(),
                value: func.start,
                size: func.size,
                kind: object::SymbolKind::Text,
                scope: Self::scope_for(sym.linkage),
                weak: false,
                section: SymbolSection::Section(text),
                flags: SymbolFlags::None,
            });
            ids.insert(func.sym, id);
        }
        for rec in &self.objects {
            let sym = sess.syms.get(rec.sym);
            let id = obj.add_symbol(Symbol {
                name: sym.name.as_bytes().to_vec(),
                value: rec.offset,
                size: rec.size,
                kind: object::SymbolKind::Data,
                scope: Self::scope_for(sym.linkage),
                weak: false,
                section: SymbolSection::Section(data),
                flags: SymbolFlags::None,
            });
            ids.insert(rec.sym, id);
        }
        for rec in &self.bss {
            let sym = sess.syms.get(rec.sym);
            let offset = obj.append_section_bss(bss, rec.size, rec.align);
            let id = obj.add_symbol(Symbol {
                name: sym.name.as_bytes().to_vec(),
                value: offset,
                size: rec.size,
                kind: object::SymbolKind::Data,
                scope: Self::scope_for(sym.linkage),
                weak: false,
                section: SymbolSection::Section(bss),
                flags: SymbolFlags::None,
            });
            ids.insert(rec.sym, id);
        }

        // Anything still unresolved is an external reference.
        fn resolve_symbol(
            obj: &mut Object<'_>,
            ids: &mut HashMap<SymbolId, object::write::SymbolId>,
            sess: &Session,
            sym_id: SymbolId,
        ) -> object::write::SymbolId {
            if let Some(&id) = ids.get(&sym_id) {
                return id;
            }
            let sym = sess.syms.get(sym_id);
            let id = obj.add_symbol(Symbol {
                name: sym.name.as_bytes().to_vec(),
                value: 0,
                size: 0,
                kind: if sess.types.is_function(sym.ty) {
                    object::SymbolKind::Text
                } else {
                    object::SymbolKind::Data
                },
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Undefined,
                flags: SymbolFlags::None,
            });
            ids.insert(sym_id, id);
            id
        }

        for reloc in &self.text_relocs {
            let symbol = resolve_symbol(&mut obj, &mut ids, sess, reloc.sym);
            let r_type = match reloc.kind {
                RelocKind::Pc32 => object::elf::R_X86_64_PC32,
                RelocKind::Abs32S => object::elf::R_X86_64_32S,
                RelocKind::Abs64 => object::elf::R_X86_64_64,
            };
            obj.add_relocation(
                text,
                Relocation {
                    offset: reloc.offset,
                    symbol,
                    addend: reloc.addend,
                    flags: RelocationFlags::Elf { r_type },
                },
            )
            .map_err(|e| CompileError::ObjectWrite {
                reason: e.to_string(),
            })?;
        }
        for reloc in &self.data_relocs {
            let symbol = resolve_symbol(&mut obj, &mut ids, sess, reloc.sym);
            obj.add_relocation(
                data,
                Relocation {
                    offset: reloc.offset,
                    symbol,
                    addend: reloc.addend,
                    flags: RelocationFlags::Elf {
                        r_type: object::elf::R_X86_64_64,
                    },
                },
            )
            .map_err(|e| CompileError::ObjectWrite {
                reason: e.to_string(),
            })?;
        }

        obj.write().map_err(|e| CompileError::ObjectWrite {
            reason: e.to_string(),
        })
    }

    /// Emit string literals and tentative objects straight from the symbol
    /// table. Called once after all definitions are compiled.
    pub fn emit_symbol_table_objects(&mut self, sess: &Session) {
        let mut strings = Vec::new();
        let mut tentative = Vec::new();
        for (id, sym) in sess.syms.iter() {
            match sym.kind {
                SymbolKind::StringValue => strings.push(id),
                SymbolKind::Tentative
                    if sym.depth == 0 && !sess.types.is_function(sym.ty) =>
                {
                    tentative.push(id)
                }
                _ => {}
            }
        }
        for id in strings {
            let sym = sess.syms.get(id);
            let mut bytes = sym
                .string_value
                .as_deref()
                .unwrap_or_default()
                .as_bytes()
                .to_vec();
            bytes.push(0);
            self.add_data_object(id, &bytes, 1);
        }
        for id in tentative {
            let sym = sess.syms.get(id);
            let size = sess.types.size_of(sym.ty);
            if size == 0 {
                continue;
            }
            let align = crate::x64::abi::sym_alignment(&sess.types, sym.ty);
            self.add_bss_object(id, u64::from(size), u64::from(align));
        }
    }
}

impl Default for ElfWriter {
    fn default() -> Self {
        ElfWriter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtab::Space;
    use crate::types::TypeTable;
    use crate::x64::instr::{Immediate, Opcode, Operands};
    use object::{Object as _, ObjectSection, ObjectSymbol};

    fn session_with_func(name: &str) -> (Session, SymbolId) {
        let mut sess = Session::new();
        let fty = sess.types.function(TypeTable::INT);
        let sym = sess.syms.add(
            Space::Ident,
            name,
            fty,
            SymbolKind::Definition,
            Linkage::Extern,
        );
        (sess, sym)
    }

    #[test]
    fn test_simple_object_roundtrip() {
        let (sess, sym) = session_with_func("foo");
        let mut elf = ElfWriter::new();
        elf.begin_function(sym);
        elf.emit(&Instruction::nullary(Opcode::Ret));
        elf.end_function();
        let bytes = elf.finish(&sess).unwrap();

        let file = object::File::parse(&*bytes).unwrap();
        let text = file.section_by_name(".text").unwrap();
        assert_eq!(text.data().unwrap(), &[0xC3]);
        let sym = file.symbols().find(|s| s.name() == Ok("foo")).unwrap();
        assert_eq!(sym.address(), 0);
        assert_eq!(sym.size(), 1);
    }

    #[test]
    fn test_forward_jump_patched() {
        let (mut sess, sym) = session_with_func("f");
        let label = sess.syms.create_label();
        let mut elf = ElfWriter::new();
        elf.begin_function(sym);
        // jmp forward over a nop to the label.
        elf.emit(&Instruction::new(
            Opcode::Jmp,
            Operands::Imm(Immediate::addr(label, 0)),
        ));
        elf.emit(&Instruction::nullary(Opcode::Nop));
        elf.place_label(label);
        elf.emit(&Instruction::nullary(Opcode::Ret));
        elf.end_function();
        let bytes = elf.finish(&sess).unwrap();

        let file = object::File::parse(&*bytes).unwrap();
        let text = file.section_by_name(".text").unwrap();
        let code = text.data().unwrap();
        // E9 <disp32> 90 C3; field at 1, target at 6: disp = 6 - 1 - 4 = 1.
        assert_eq!(code[0], 0xE9);
        let disp = i32::from_le_bytes(code[1..5].try_into().unwrap());
        assert_eq!(disp, 1);
    }

    #[test]
    fn test_call_relocation_recorded() {
        let (mut sess, sym) = session_with_func("caller");
        let ext_ty = sess.types.function(TypeTable::INT);
        let callee = sess.syms.add(
            Space::Ident,
            "callee",
            ext_ty,
            SymbolKind::Declaration,
            Linkage::Extern,
        );
        let mut elf = ElfWriter::new();
        elf.begin_function(sym);
        elf.emit(&Instruction::new(
            Opcode::Call,
            Operands::Imm(Immediate::addr(callee, 0)),
        ));
        elf.emit(&Instruction::nullary(Opcode::Ret));
        elf.end_function();
        let bytes = elf.finish(&sess).unwrap();

        let file = object::File::parse(&*bytes).unwrap();
        let text = file.section_by_name(".text").unwrap();
        let relocs: Vec<_> = text.relocations().collect();
        assert_eq!(relocs.len(), 1);
        assert_eq!(relocs[0].0, 1);
        assert!(file.symbols().any(|s| s.name() == Ok("callee") && s.is_undefined()));
    }

    #[test]
    fn test_string_data_and_bss_from_symbol_table() {
        let mut sess = Session::new();
        let arr = sess.types.array_of(TypeTable::CHAR, 6);
        sess.syms.create_string("hello", arr);
        let tentative_ty = sess.types.array_of(TypeTable::INT, 4);
        sess.syms.add(
            Space::Ident,
            "buffer",
            tentative_ty,
            SymbolKind::Tentative,
            Linkage::Extern,
        );

        let mut elf = ElfWriter::new();
        elf.emit_symbol_table_objects(&sess);
        let bytes = elf.finish(&sess).unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        let data = file.section_by_name(".data").unwrap();
        assert_eq!(data.data().unwrap(), b"hello\0");
        let bss = file.section_by_name(".bss").unwrap();
        assert_eq!(bss.size(), 16);
        assert!(file.symbols().any(|s| s.name() == Ok("buffer")));
    }
}
