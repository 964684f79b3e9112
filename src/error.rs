//! Shared error utilities used across the compilation pipeline.
//!
//! Every stage stops at the first problem it finds and hands the error back
//! untouched. Positions are 1-based line/column pairs (columns count bytes)
//! plus the byte offset, which `render` uses to point at the offending byte
//! with a caret, chibicc style.

use snafu::Snafu;

use crate::tokenizer::Token;

pub type CompileResult<T> = Result<T, CompileError>;

/// Pipeline stage that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Lex,
  Parse,
  Codegen,
  Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum CompileError {
  #[snafu(display("{line}:{column}: lex error: {message}"))]
  Lex {
    line: usize,
    column: usize,
    offset: usize,
    message: String,
  },
  #[snafu(display("{line}:{column}: parse error: {message}"))]
  Parse {
    line: usize,
    column: usize,
    offset: usize,
    message: String,
  },
  #[snafu(display("{line}:{column}: codegen error: {message}"))]
  Codegen {
    line: usize,
    column: usize,
    offset: usize,
    message: String,
  },
  #[snafu(display("internal error: {message}"))]
  Internal { message: String },
}

impl CompileError {
  pub fn lex(line: usize, column: usize, offset: usize, message: impl Into<String>) -> Self {
    Self::Lex {
      line,
      column,
      offset,
      message: message.into(),
    }
  }

  /// Parse error anchored at the token the parser was looking at.
  pub fn parse(token: &Token, message: impl Into<String>) -> Self {
    Self::Parse {
      line: token.line,
      column: token.column,
      offset: token.offset,
      message: message.into(),
    }
  }

  /// Codegen error anchored at the token of the node being lowered.
  pub fn codegen(token: &Token, message: impl Into<String>) -> Self {
    Self::Codegen {
      line: token.line,
      column: token.column,
      offset: token.offset,
      message: message.into(),
    }
  }

  pub fn internal(message: impl Into<String>) -> Self {
    Self::Internal {
      message: message.into(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Lex { .. } => ErrorKind::Lex,
      Self::Parse { .. } => ErrorKind::Parse,
      Self::Codegen { .. } => ErrorKind::Codegen,
      Self::Internal { .. } => ErrorKind::Internal,
    }
  }

  pub fn message(&self) -> &str {
    match self {
      Self::Lex { message, .. }
      | Self::Parse { message, .. }
      | Self::Codegen { message, .. }
      | Self::Internal { message } => message,
    }
  }

  /// 1-based `(line, column)` of the error, when it has one.
  pub fn position(&self) -> Option<(usize, usize)> {
    match self {
      Self::Lex { line, column, .. }
      | Self::Parse { line, column, .. }
      | Self::Codegen { line, column, .. } => Some((*line, *column)),
      Self::Internal { .. } => None,
    }
  }

  fn offset(&self) -> Option<usize> {
    match self {
      Self::Lex { offset, .. } | Self::Parse { offset, .. } | Self::Codegen { offset, .. } => {
        Some(*offset)
      }
      Self::Internal { .. } => None,
    }
  }

  /// Format the error together with the source line it points into.
  pub fn render(&self, source: &str) -> String {
    let Some(offset) = self.offset() else {
      return self.to_string();
    };

    let mut loc = offset.min(source.len());
    while !source.is_char_boundary(loc) {
      loc -= 1;
    }
    let line_start = source[..loc].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[loc..].find('\n').map_or(source.len(), |i| loc + i);

    let expr_line = format!("'{}'", &source[line_start..line_end]);
    let char_offset = source[line_start..loc].chars().count() + 1; // account for opening quote
    let marker = format!("{}^", " ".repeat(char_offset));
    format!("{self}\n{expr_line}\n{marker}")
  }
}
