//! End-to-end scenarios: parse C snippets, inspect the IR and symbol/type
//! tables, and read back the emitted object files.

use cc64::elf::ElfWriter;
use cc64::ir::{IrOp, Terminator};
use cc64::parser::Parser;
use cc64::symtab::{SymbolKind, Space};
use cc64::types::TypeTable;
use cc64::x64::codegen::CodeGen;
use object::{Object, ObjectSection, ObjectSymbol};

fn build_object(source: &str) -> Vec<u8> {
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
    elf.finish(&sess).unwrap()
}

#[test]
fn add_function_ir_and_object() {
    // One defined symbol `add`; the entry block computes the sum and
    // returns it.
    let mut parser = Parser::from_source("int add(int a, int b) { return a + b; }").unwrap();
    let def = parser.parse().unwrap().unwrap();
    let sess = parser.session();

    assert_eq!(sess.syms.get(def.symbol).name, "add");
    assert_eq!(def.params.len(), 2);
    let entry = def.block(def.body);
    assert!(entry.code.iter().any(|op| op.op == IrOp::Add));
    let has_return = def
        .blocks
        .iter()
        .any(|b| matches!(b.terminator, Terminator::Return(Some(_))));
    assert!(has_return);
    assert!(parser.parse().unwrap().is_none());

    let bytes = build_object("int add(int a, int b) { return a + b; }");
    let file = object::File::parse(&*bytes).unwrap();
    let sym = file.symbols().find(|s| s.name() == Ok("add")).unwrap();
    assert!(!sym.is_undefined());
    assert!(sym.size() > 0);
}

#[test]
fn struct_layout_scenario() {
    // struct P { int x; char y; }: size 8, alignment 4, offsets 0 and 4.
    let mut parser = Parser::from_source("struct P { int x; char y; };").unwrap();
    assert!(parser.parse().unwrap().is_none());
    let sess = parser.session();
    let tag = sess.syms.lookup(Space::Tag, "P").unwrap();
    let ty = sess.syms.get(tag).ty;
    assert_eq!(sess.types.size_of(ty), 8);
    assert_eq!(sess.types.alignment(ty), 4);
    assert_eq!(sess.types.member(ty, 0).offset, 0);
    assert_eq!(sess.types.member(ty, 1).offset, 4);
}

#[test]
fn string_initializer_creates_anonymous_symbol() {
    // char *s = "hello": an anonymous char[6] string symbol, with the
    // pointer initialized to its address.
    let mut parser = Parser::from_source("char *s = \"hello\";").unwrap();
    let def = parser.parse().unwrap().unwrap();
    let sess = parser.session();
    let string_sym = sess
        .syms
        .iter()
        .find(|(_, s)| s.kind == SymbolKind::StringValue)
        .map(|(id, _)| id)
        .unwrap();
    let sty = sess.syms.get(string_sym).ty;
    assert!(sess.types.is_array(sty));
    assert_eq!(sess.types.size_of(sty), 6);

    let init = &def.block(def.body).code[0];
    assert_eq!(init.op, IrOp::Assign);
    assert_eq!(init.a.symbol, Some(string_sym));
}

#[test]
fn enum_values_scenario() {
    let mut parser = Parser::from_source("enum { A = 1, B, C = 10, D };").unwrap();
    assert!(parser.parse().unwrap().is_none());
    let sess = parser.session();
    for (name, value) in [("A", 1), ("B", 2), ("C", 10), ("D", 11)] {
        let sym = sess.syms.lookup(Space::Ident, name).unwrap();
        let sym = sess.syms.get(sym);
        assert_eq!(sym.kind, SymbolKind::EnumValue);
        assert_eq!(sym.enum_value, value);
        assert_eq!(sym.ty, TypeTable::INT);
    }
}

#[test]
fn incomplete_array_completed_by_initializer() {
    // int a[] = {1,2,3}: the symbol's type is rewritten to int[3].
    let mut parser = Parser::from_source("int a[] = {1, 2, 3};").unwrap();
    parser.parse().unwrap().unwrap();
    let sess = parser.session();
    let sym = sess.syms.lookup(Space::Ident, "a").unwrap();
    let ty = sess.syms.get(sym).ty;
    assert!(sess.types.is_array(ty));
    assert_eq!(sess.types.size_of(ty), 12);
    assert_eq!(sess.types.array_len(ty), 3);
}

#[test]
fn string_array_initializer_completes_from_literal() {
    let mut parser = Parser::from_source("char s[] = \"hi\";").unwrap();
    parser.parse().unwrap().unwrap();
    let sess = parser.session();
    let sym = sess.syms.lookup(Space::Ident, "s").unwrap();
    let ty = sess.syms.get(sym).ty;
    assert_eq!(sess.types.size_of(ty), 3);
}

#[test]
fn multiple_definitions_buffered_in_order() {
    let mut parser = Parser::from_source("int x = 1, y = 2;").unwrap();
    let first = parser.parse().unwrap().unwrap();
    let second = parser.parse().unwrap().unwrap();
    let sess = parser.session();
    assert_eq!(sess.syms.get(first.symbol).name, "x");
    assert_eq!(sess.syms.get(second.symbol).name, "y");
    assert!(parser.parse().unwrap().is_none());
}

#[test]
fn func_builtin_defined_in_functions() {
    let mut parser =
        Parser::from_source("int f(void) { return sizeof __func__; }").unwrap();
    let _ = parser.parse().unwrap().unwrap();
    let sess = parser.session();
    let sym = sess
        .syms
        .iter()
        .find(|(_, s)| s.name == "__func__")
        .map(|(_, s)| s)
        .unwrap();
    assert_eq!(sym.kind, SymbolKind::StringValue);
    assert_eq!(sym.string_value.as_deref(), Some("f"));
}

#[test]
fn tentative_definition_lands_in_bss() {
    let bytes = build_object("int buffer[16];");
    let file = object::File::parse(&*bytes).unwrap();
    let bss = file.section_by_name(".bss").unwrap();
    assert_eq!(bss.size(), 64);
    assert!(file.symbols().any(|s| s.name() == Ok("buffer")));
}

#[test]
fn switch_statement_compiles() {
    let bytes = build_object(
        "int classify(int c) {\n\
         switch (c) {\n\
         case 1: return 10;\n\
         case 2: return 20;\n\
         default: return -1;\n\
         }\n\
         }",
    );
    let file = object::File::parse(&*bytes).unwrap();
    let text = file.section_by_name(".text").unwrap();
    assert!(!text.data().unwrap().is_empty());
}

#[test]
fn logical_operators_short_circuit_blocks() {
    let mut parser =
        Parser::from_source("int f(int a, int b) { return a && b; }").unwrap();
    let def = parser.parse().unwrap().unwrap();
    // The entry ends in a conditional branch into the spliced sub-graph.
    assert!(matches!(
        def.block(def.body).terminator,
        Terminator::Branch(..)
    ));
    assert!(def.blocks.len() >= 3);
}

#[test]
fn global_pointer_arithmetic_folds() {
    // Constant folding happens at parse time; the data image holds 12.
    let bytes = build_object("int x = 2 + 2 * 5;");
    let file = object::File::parse(&*bytes).unwrap();
    let data = file.section_by_name(".data").unwrap();
    assert_eq!(&data.data().unwrap()[..4], &[12, 0, 0, 0]);
}

#[test]
fn struct_argument_and_return_compile() {
    let bytes = build_object(
        "struct pair { long a; long b; };\n\
         struct pair make(long a, long b) {\n\
         struct pair p;\n\
         p.a = a; p.b = b;\n\
         return p;\n\
         }\n\
         long total(struct pair p) { return p.a + p.b; }",
    );
    let file = object::File::parse(&*bytes).unwrap();
    assert!(file.symbols().any(|s| s.name() == Ok("make")));
    assert!(file.symbols().any(|s| s.name() == Ok("total")));
}

#[test]
fn variadic_function_compiles() {
    let bytes = build_object(
        "int sum(int n, ...) {\n\
         char ap[24];\n\
         int i; int total;\n\
         __builtin_va_start(ap, n);\n\
         total = 0;\n\
         for (i = 0; i < n; i++) total = total + __builtin_va_arg(ap, int);\n\
         return total;\n\
         }",
    );
    let file = object::File::parse(&*bytes).unwrap();
    assert!(file.symbols().any(|s| s.name() == Ok("sum")));
}

#[test]
fn duplicate_specifier_is_rejected() {
    let result = Parser::from_source("const const int x;").unwrap().parse();
    assert!(result.is_err());
}

#[test]
fn conflicting_tag_kind_is_rejected() {
    let mut parser =
        Parser::from_source("struct t { int x; };\nunion t u;").unwrap();
    assert!(parser.parse().is_err());
}

#[test]
fn file_scope_initializer_must_be_constant() {
    let mut parser = Parser::from_source("int f(void);\nint x = f();").unwrap();
    assert!(parser.parse().is_err());
}

#[test]
fn zero_fill_of_trailing_members() {
    // Omitted trailing members become explicit zero assignments.
    let mut parser = Parser::from_source(
        "struct v { int a; int b; int c; };\n\
         struct v g = {1};",
    )
    .unwrap();
    let def = parser.parse().unwrap().unwrap();
    let ops = &def.block(def.body).code;
    assert_eq!(ops.len(), 3);
    assert!(ops.iter().all(|op| op.op == IrOp::Assign));
    assert_eq!(ops[1].a.imm, 0);
    assert_eq!(ops[2].a.imm, 0);
    assert_eq!(ops[1].target.offset, 4);
    assert_eq!(ops[2].target.offset, 8);
}
