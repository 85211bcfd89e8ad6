use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read};
use std::path::PathBuf;
use std::process;

use clap::Parser;

use smlc::codegen::CodegenOptions;
use smlc::error::CompileError;
use smlc::lexer::Lexer;

/// Compiler for SML, a small typeless imperative language.
///
/// Reads a program from FILE (or standard input), writes assembly
/// for the 32-bit eight-register target to standard output, and
/// prints diagnostics to standard error.
#[derive(Parser)]
#[command(name = "smlc", version)]
struct Cli {
    /// Source file; standard input when omitted
    input: Option<PathBuf>,

    /// Write assembly here instead of standard output
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Exit nonzero when any recoverable diagnostic was printed
    #[arg(long)]
    strict: bool,

    /// Print the analyzed syntax tree to standard error and exit
    #[arg(long)]
    dump_ast: bool,

    /// Words reserved for the stack region
    #[arg(long, default_value_t = 128)]
    stack_words: usize,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let reader: Box<dyn Read> = match &cli.input {
        Some(path) => match File::open(path) {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(err) => {
                eprintln!("Failed to read {}: {err}", path.display());
                process::exit(1);
            }
        },
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut diagnostics = Vec::new();
    let result = if cli.dump_ast {
        dump_ast(reader, &mut diagnostics)
    } else {
        let options = CodegenOptions {
            stack_words: cli.stack_words,
            ..CodegenOptions::default()
        };
        match &cli.output {
            Some(path) => match File::create(path) {
                Ok(file) => smlc::compile(
                    reader,
                    BufWriter::new(file),
                    &options,
                    &mut diagnostics,
                ),
                Err(err) => {
                    eprintln!("Failed to write {}: {err}", path.display());
                    process::exit(1);
                }
            },
            None => smlc::compile(
                reader,
                BufWriter::new(io::stdout().lock()),
                &options,
                &mut diagnostics,
            ),
        }
    };

    for diagnostic in &diagnostics {
        eprintln!("{diagnostic}");
    }
    if let Err(fatal) = result {
        eprintln!("{fatal}");
        process::exit(1);
    }
    if cli.strict && !diagnostics.is_empty() {
        process::exit(1);
    }
}

/// Parse and analyze only, then print the decorated tree.
fn dump_ast(
    reader: Box<dyn Read>,
    diagnostics: &mut Vec<CompileError>,
) -> Result<(), CompileError> {
    let mut lexer = Lexer::new(reader);
    let parsed = smlc::parser::parse(&mut lexer);
    let (source, mut lexed_diagnostics) = lexer.finish();
    diagnostics.append(&mut lexed_diagnostics);
    let mut ast = parsed?;
    smlc::context::analyze(&mut ast, &source, diagnostics)?;
    let mut err = io::stderr().lock();
    ast.write_tree(&mut err, &|span| source.text(span))?;
    Ok(())
}
