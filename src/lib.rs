//! # SMLC
//!
//! A batch compiler for SML, a small typeless imperative language,
//! targeting a 32-bit machine with eight general-purpose registers.
//!
//! ## Pipeline
//!
//! Source bytes flow forward through four stages; the AST is the
//! only shared intermediate representation and no stage re-enters a
//! previous one:
//!
//! 1. **Lexer** - bytes to tokens, one token of lookahead
//! 2. **Parser** - recursive descent and precedence climbing to AST
//! 3. **Contextual analysis** - name resolution, frame layout,
//!    constant evaluation
//! 4. **Code generation** - decorated AST to assembly text
//!
//! ## Example
//!
//! ```rust
//! use smlc::codegen::CodegenOptions;
//!
//! let source = "func void main() { return }\n";
//! let mut assembly = Vec::new();
//! let mut diagnostics = Vec::new();
//! smlc::compile(
//!     source.as_bytes(),
//!     &mut assembly,
//!     &CodegenOptions::default(),
//!     &mut diagnostics,
//! )
//! .expect("compile failed");
//!
//! assert!(String::from_utf8_lossy(&assembly).contains("main:"));
//! ```

pub mod codegen;
pub mod context;
pub mod error;
pub mod lexer;
pub mod parser;

use std::io::{Read, Write};

use log::debug;

use codegen::CodegenOptions;
use error::CompileError;
use lexer::Lexer;

/// Run the whole pipeline: read a program from `input`, write its
/// assembly to `output`.
///
/// Recoverable diagnostics are appended to `diagnostics` whether or
/// not the compile succeeds; a fatal error comes back as `Err` and
/// no further stage runs. Output is produced only once analysis has
/// succeeded.
pub fn compile<R: Read, W: Write>(
    input: R,
    mut output: W,
    options: &CodegenOptions,
    diagnostics: &mut Vec<CompileError>,
) -> Result<(), CompileError> {
    let mut lexer = Lexer::new(input);
    let parsed = parser::parse(&mut lexer);
    let (source, mut lexed_diagnostics) = lexer.finish();
    diagnostics.append(&mut lexed_diagnostics);
    let mut ast = parsed?;
    debug!("input buffer holds {} bytes", source.len());

    context::analyze(&mut ast, &source, diagnostics)?;
    codegen::generate(&ast, &source, options, &mut output, diagnostics)?;
    output.flush()?;
    Ok(())
}
