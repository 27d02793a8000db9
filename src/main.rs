use clap::Parser as ClapParser;
use std::fs;
use std::path::PathBuf;
use std::process;

use cc64::elf::ElfWriter;
use cc64::parser::Parser;
use cc64::x64::codegen::CodeGen;
use cc64::CompileResult;

#[derive(ClapParser, Debug)]
#[command(name = "cc64")]
#[command(about = "A C89 compiler targeting x86-64 ELF", long_about = None)]
struct Args {
    #[arg(help = "Input C source file")]
    input: PathBuf,

    #[arg(short, long, help = "Output object file")]
    output: Option<PathBuf>,

    #[arg(long, help = "Print tokens and exit")]
    lex_only: bool,

    #[arg(long, help = "Print the control-flow graph of each definition in dot format")]
    dot: bool,
}

fn compile(args: &Args, source: &str) -> CompileResult<Option<Vec<u8>>> {
    if args.lex_only {
        let tokens = cc64::lexer::Lexer::new(source).tokenize()?;
        for token in &tokens {
            println!("{:?}", token.kind);
        }
        return Ok(None);
    }

    let mut parser = Parser::from_source(source)?;
    let mut defs = Vec::new();
    while let Some(def) = parser.parse()? {
        defs.push(def);
    }
    let mut sess = parser.into_session();

    if args.dot {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for def in &defs {
            cc64::dot::fdotgen(&mut out, &sess, def).map_err(|e| {
                cc64::CompileError::ObjectWrite {
                    reason: e.to_string(),
                }
            })?;
        }
        return Ok(None);
    }

    let mut elf = ElfWriter::new();
    for def in &defs {
        CodeGen::new(&mut sess, &mut elf).compile(def)?;
    }
    elf.emit_symbol_table_objects(&sess);
    Ok(Some(elf.finish(&sess)?))
}

fn main() {
    let args = Args::parse();

    let source = match fs::read_to_string(&args.input) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("error reading file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let object = match compile(&args, &source) {
        Ok(Some(object)) => object,
        Ok(None) => return,
        Err(e) => {
            eprintln!("{}: {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let output_path = args.output.clone().unwrap_or_else(|| {
        let mut path = args.input.clone();
        path.set_extension("o");
        path
    });

    if let Err(e) = fs::write(&output_path, object) {
        eprintln!("error writing '{}': {}", output_path.display(), e);
        process::exit(1);
    }
}
