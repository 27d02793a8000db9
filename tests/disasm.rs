//! Cross-checks the hand-rolled encoder against the iced-x86 disassembler:
//! every emitted function must decode as a well-formed instruction stream
//! with the expected prologue and terminator.

use cc64::elf::ElfWriter;
use cc64::parser::Parser;
use cc64::x64::codegen::CodeGen;
use iced_x86::{Decoder, DecoderOptions, Mnemonic};
use object::{Object, ObjectSection, ObjectSymbol};

fn function_bytes(source: &str, name: &str) -> Vec<u8> {
    let mut parser = Parser::from_source(source).unwrap();
    let mut defs = Vec::new();
    while let Some(def) = parser.parse().unwrap() {
        defs.push(def);
    }
    let mut sess = parser.into_session();
    let mut elf = ElfWriter::new();
    for def in &defs {
        CodeGen::new(&mut sess, &mut elf).compile(def).unwrap();
    }
    elf.emit_symbol_table_objects(&sess);
    let bytes = elf.finish(&sess).unwrap();

    let file = object::File::parse(&*bytes).unwrap();
    let sym = file.symbols().find(|s| s.name() == Ok(name)).unwrap();
    let text = file.section_by_name(".text").unwrap();
    let data = text.data().unwrap();
    let start = sym.address() as usize;
    let end = start + sym.size() as usize;
    data[start..end].to_vec()
}

fn disassemble(code: &[u8]) -> Vec<Mnemonic> {
    let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
    let mut mnemonics = Vec::new();
    while decoder.can_decode() {
        let instr = decoder.decode();
        assert!(!instr.is_invalid(), "invalid instruction in stream");
        mnemonics.push(instr.mnemonic());
    }
    mnemonics
}

#[test]
fn add_function_decodes_cleanly() {
    let code = function_bytes("int add(int a, int b) { return a + b; }", "add");
    let mnemonics = disassemble(&code);
    assert_eq!(mnemonics[0], Mnemonic::Push);
    assert_eq!(mnemonics[1], Mnemonic::Mov);
    assert!(mnemonics.contains(&Mnemonic::Add));
    assert!(mnemonics.contains(&Mnemonic::Leave));
    assert_eq!(*mnemonics.last().unwrap(), Mnemonic::Ret);
}

#[test]
fn comparison_uses_setcc() {
    let code = function_bytes("int lt(int a, int b) { return a < b; }", "lt");
    let mnemonics = disassemble(&code);
    assert!(mnemonics.contains(&Mnemonic::Cmp));
    assert!(mnemonics.contains(&Mnemonic::Setg));
    assert!(mnemonics.contains(&Mnemonic::Movzx));
}

#[test]
fn unsigned_division_decodes() {
    let code = function_bytes(
        "unsigned int half(unsigned int x) { return x / 2u; }",
        "half",
    );
    let mnemonics = disassemble(&code);
    assert!(mnemonics.contains(&Mnemonic::Div));
    assert!(mnemonics.contains(&Mnemonic::Xor));
}

#[test]
fn shifts_pick_sar_for_signed() {
    let signed = function_bytes("int f(int x, int n) { return x >> n; }", "f");
    assert!(disassemble(&signed).contains(&Mnemonic::Sar));
    let unsigned = function_bytes(
        "unsigned g(unsigned x, int n) { return x >> n; }",
        "g",
    );
    assert!(disassemble(&unsigned).contains(&Mnemonic::Shr));
}

#[test]
fn aggregate_copy_uses_rep_movsq() {
    let code = function_bytes(
        "struct big { long a; long b; long c; };\n\
         void copy(struct big *d, struct big *s) { *d = *s; }",
        "copy",
    );
    let mnemonics = disassemble(&code);
    assert!(mnemonics.contains(&Mnemonic::Movsq));
}

#[test]
fn while_loop_branches_decode() {
    let code = function_bytes(
        "int count(int n) { int i; i = 0; while (i < n) i++; return i; }",
        "count",
    );
    let mnemonics = disassemble(&code);
    assert!(mnemonics.contains(&Mnemonic::Je));
    assert!(mnemonics.contains(&Mnemonic::Jmp));
}
