//! Crate root: wires together the compilation pipeline.
//!
//! The stages are small and run strictly one after another:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` builds the program tree inside a `NodeArena` (`arena`).
//! - `codegen` walks the tree once and lowers it to x86-64 assembly, using
//!   `asm` for the dialect-specific instruction text.
//! - `error` centralises reporting utilities shared by the other modules.
//!
//! Nothing here touches the file system or the process; the `hydroc` binary
//! owns that.

pub mod arena;
pub mod asm;
pub mod codegen;
pub mod error;
pub mod parser;
pub mod tokenizer;

use arena::NodeArena;
use tokenizer::Token;

pub use asm::Syntax;
pub use error::{CompileError, CompileResult, ErrorKind};

/// Knobs for one compilation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
  pub syntax: Syntax,
}

/// Compile a source string into NASM assembly.
pub fn compile(source: &str) -> CompileResult<String> {
  compile_with(source, &CompileOptions::default())
}

pub fn compile_with(source: &str, options: &CompileOptions) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  lower(tokens, options)
}

/// Compile raw bytes; invalid UTF-8 is reported as a lex error.
pub fn compile_bytes(source: &[u8], options: &CompileOptions) -> CompileResult<String> {
  let tokens = tokenizer::tokenize_bytes(source)?;
  lower(tokens, options)
}

fn lower(tokens: Vec<Token>, options: &CompileOptions) -> CompileResult<String> {
  let mut arena = NodeArena::new();
  let root = parser::parse(tokens, &mut arena)?;
  codegen::generate(&arena, root, options.syntax)
}
