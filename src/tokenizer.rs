//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! Text is split at boundary characters (whitespace, parentheses, braces,
//! `=`, the arithmetic operators and `;`); everything between two boundaries
//! is one token whose kind is decided by `classify` from its text alone.
//! Newlines are significant: they end statements, so they come out as
//! `Terminator` tokens, with runs of blank lines folded into one.

use log::debug;

use crate::error::{CompileError, CompileResult};

/// Words that can never be used as identifiers.
pub const KEYWORDS: [&str; 5] = ["exit", "let", "if", "elif", "else"];

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Punctuation,
  Operator,
  Identifier,
  IntLiteral,
  Keyword,
  Terminator,
  Eof,
}

/// A classified lexeme and where it starts. `column` counts bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  pub line: usize,
  pub column: usize,
  pub offset: usize,
}

impl Token {
  pub fn new(
    kind: TokenKind,
    text: impl Into<String>,
    line: usize,
    column: usize,
    offset: usize,
  ) -> Self {
    Self {
      kind,
      text: text.into(),
      line,
      column,
      offset,
    }
  }

  /// True if this token's text is exactly `text`.
  pub fn is(&self, text: &str) -> bool {
    self.kind != TokenKind::Eof && self.text == text
  }

  pub fn is_eof(&self) -> bool {
    self.kind == TokenKind::Eof
  }

  /// Human-friendly description used in diagnostics.
  pub fn describe(&self) -> String {
    match self.kind {
      TokenKind::Eof => "EOF".to_string(),
      TokenKind::Terminator if self.text == "\n" => "newline".to_string(),
      _ => self.text.clone(),
    }
  }
}

/// Decide the kind of a token from its text, or `None` if it is not part of
/// the language.
pub fn classify(text: &str) -> Option<TokenKind> {
  match text {
    "\n" | ";" => return Some(TokenKind::Terminator),
    "+" | "-" | "*" | "/" => return Some(TokenKind::Operator),
    "=" | "(" | ")" | "{" | "}" => return Some(TokenKind::Punctuation),
    _ => {}
  }

  if KEYWORDS.contains(&text) {
    return Some(TokenKind::Keyword);
  }

  let bytes = text.as_bytes();
  let (first, rest) = bytes.split_first()?;
  if bytes.iter().all(u8::is_ascii_digit) {
    return Some(TokenKind::IntLiteral);
  }
  if (first.is_ascii_alphabetic() || *first == b'_')
    && rest.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_')
  {
    return Some(TokenKind::Identifier);
  }
  None
}

fn is_boundary(c: u8) -> bool {
  c.is_ascii_whitespace()
    || matches!(
      c,
      b'(' | b')' | b'{' | b'}' | b'=' | b'+' | b'-' | b'*' | b'/' | b';'
    )
}

/// Decode raw bytes as UTF-8 and lex them.
pub fn tokenize_bytes(bytes: &[u8]) -> CompileResult<Vec<Token>> {
  match std::str::from_utf8(bytes) {
    Ok(source) => tokenize(source),
    Err(err) => {
      let offset = err.valid_up_to();
      let consumed = &bytes[..offset];
      let line = consumed.iter().filter(|b| **b == b'\n').count() + 1;
      let line_start = consumed
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);
      Err(CompileError::lex(
        line,
        offset - line_start + 1,
        offset,
        format!("invalid UTF-8 sequence at byte {offset}"),
      ))
    }
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;
  let mut line = 1;
  let mut column = 1;
  // Start of file behaves like the position right after a terminator so
  // leading blank lines produce nothing.
  let mut after_terminator = true;

  while i < bytes.len() {
    let c = bytes[i];

    if c == b'\n' {
      if !after_terminator {
        tokens.push(Token::new(TokenKind::Terminator, "\n", line, column, i));
        after_terminator = true;
      }
      i += 1;
      line += 1;
      column = 1;
      continue;
    }

    if c.is_ascii_whitespace() {
      i += 1;
      column += 1;
      continue;
    }

    if bytes[i..].starts_with(b"//") {
      while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
        column += 1;
      }
      continue;
    }

    if bytes[i..].starts_with(b"/*") {
      let (start, start_line, start_column) = (i, line, column);
      i += 2;
      column += 2;
      loop {
        if i >= bytes.len() {
          return Err(CompileError::lex(
            start_line,
            start_column,
            start,
            "unterminated block comment",
          ));
        }
        if bytes[i..].starts_with(b"*/") {
          i += 2;
          column += 2;
          break;
        }
        if bytes[i] == b'\n' {
          line += 1;
          column = 1;
        } else {
          column += 1;
        }
        i += 1;
      }
      continue;
    }

    // Either a single boundary symbol or a maximal run of anything else.
    let start = i;
    if is_boundary(c) {
      i += 1;
    } else {
      while i < bytes.len() && !is_boundary(bytes[i]) {
        i += 1;
      }
    }
    let text = &input[start..i];
    let Some(kind) = classify(text) else {
      return Err(CompileError::lex(
        line,
        column,
        start,
        format!("unrecognized token '{text}'"),
      ));
    };
    tokens.push(Token::new(kind, text, line, column, start));
    after_terminator = kind == TokenKind::Terminator;
    column += i - start;
  }

  tokens.push(Token::new(TokenKind::Eof, "", line, column, input.len()));
  debug!("tokenized {} bytes into {} tokens", input.len(), tokens.len());
  Ok(tokens)
}
