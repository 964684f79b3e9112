//! Recursive-descent parser building the program tree inside a `NodeArena`.
//!
//! Every construct allocates its own node first and links children into it
//! once they have been parsed (back-patching), so ids only ever grow. The
//! slots of a node mean different things depending on its token:
//!
//! | node              | `left`                         | `right`                      |
//! |-------------------|--------------------------------|------------------------------|
//! | `exit`            | `(` group                      | next statement               |
//! | `let`             | `=` (ident on left, value on right) | next statement          |
//! | `if` / `elif`     | condition                      | the clause's `{`             |
//! | `else`            | -                              | the clause's `{`             |
//! | `{`               | first body statement or `}`    | next clause or statement     |
//! | `(`               | inner expression               | matching `)`                 |
//! | operator          | left operand                   | right operand                |
//!
//! Statement chains end at the EOF node at top level and at the `}` node
//! inside a block. Terminators never become nodes.

use log::{debug, trace};

use crate::arena::{NodeArena, NodeId};
use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind};

/// Deepest allowed nesting of blocks and parentheses combined.
pub const MAX_NESTING: usize = 256;

/// Binary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
}

impl BinaryOp {
  pub fn from_symbol(symbol: &str) -> Option<Self> {
    match symbol {
      "+" => Some(Self::Add),
      "-" => Some(Self::Sub),
      "*" => Some(Self::Mul),
      "/" => Some(Self::Div),
      _ => None,
    }
  }

  /// Binding strength; every operator is left-associative.
  pub fn precedence(self) -> u8 {
    match self {
      Self::Add | Self::Sub => 0,
      Self::Mul | Self::Div => 1,
    }
  }
}

/// Parse a whole program, returning the head of the top-level statement
/// chain.
pub fn parse(tokens: Vec<Token>, arena: &mut NodeArena) -> CompileResult<NodeId> {
  let before = arena.len();
  let mut parser = Parser {
    stream: TokenStream::new(tokens),
    arena,
    depth: 0,
    paren_depth: 0,
  };
  let root = parser.parse_statements(false)?;
  debug!("parsed program into {} nodes", parser.arena.len() - before);
  Ok(root)
}

struct Parser<'a> {
  stream: TokenStream,
  arena: &'a mut NodeArena,
  depth: usize,
  paren_depth: usize,
}

impl Parser<'_> {
  fn alloc_current(&mut self) -> NodeId {
    let token = self.stream.next();
    self.arena.alloc(token)
  }

  fn enter(&mut self) -> CompileResult<()> {
    if self.depth >= MAX_NESTING {
      return Err(CompileError::parse(
        self.stream.peek(),
        format!("nesting too deep (limit is {MAX_NESTING})"),
      ));
    }
    self.depth += 1;
    Ok(())
  }

  fn leave(&mut self) {
    self.depth -= 1;
  }

  /// Parse statements up to EOF (top level) or the closing `}` (inside a
  /// block). The returned chain always ends at that EOF or `}` node.
  fn parse_statements(&mut self, in_block: bool) -> CompileResult<NodeId> {
    let mut head = None;
    let mut tail: Option<NodeId> = None;

    loop {
      self.stream.skip_terminators();
      let token = self.stream.peek();

      let (first, last, done) = if token.is_eof() {
        if in_block {
          return Err(CompileError::parse(token, "expected '}', but got 'EOF'"));
        }
        let id = self.alloc_current();
        (id, id, true)
      } else if token.is("}") {
        if !in_block {
          return Err(CompileError::parse(token, "unexpected closing brace"));
        }
        let id = self.alloc_current();
        (id, id, true)
      } else {
        let (first, last) = self.parse_statement()?;
        (first, last, false)
      };

      match tail {
        Some(prev) => self.arena.link_right(prev, first)?,
        None => head = Some(first),
      }
      tail = Some(last);

      if done {
        return Ok(head.unwrap_or(first));
      }
    }
  }

  /// Parse one statement, returning its first node and the node whose
  /// `right` slot continues the chain.
  fn parse_statement(&mut self) -> CompileResult<(NodeId, NodeId)> {
    let token = self.stream.peek().clone();
    trace!(
      "statement '{}' at {}:{}",
      token.describe(),
      token.line,
      token.column
    );

    match (token.kind, token.text.as_str()) {
      (TokenKind::Keyword, "exit") => {
        let id = self.parse_exit()?;
        Ok((id, id))
      }
      (TokenKind::Keyword, "let") => {
        let id = self.parse_let()?;
        Ok((id, id))
      }
      (TokenKind::Keyword, "if") => self.parse_if(),
      (TokenKind::Keyword, keyword @ ("elif" | "else")) => Err(CompileError::parse(
        &token,
        format!("'{keyword}' without a matching 'if'"),
      )),
      (TokenKind::Punctuation, "{") => {
        let id = self.parse_block()?;
        Ok((id, id))
      }
      _ => Err(CompileError::parse(
        &token,
        format!("unexpected '{}' at start of statement", token.describe()),
      )),
    }
  }

  /// A simple statement ends at a terminator, or right before a `}` or EOF.
  fn expect_end(&mut self) -> CompileResult<()> {
    let token = self.stream.peek();
    if token.kind == TokenKind::Terminator {
      self.stream.next();
      return Ok(());
    }
    if token.is_eof() || token.is("}") {
      return Ok(());
    }
    Err(CompileError::parse(
      token,
      format!(
        "expected terminator after statement, but got '{}'",
        token.describe()
      ),
    ))
  }

  fn parse_exit(&mut self) -> CompileResult<NodeId> {
    let exit = self.alloc_current();
    let open = self.stream.peek();
    if !open.is("(") {
      return Err(CompileError::parse(
        open,
        format!("expected '(' after 'exit', but got '{}'", open.describe()),
      ));
    }
    let group = self.parse_group()?;
    self.arena.link_left(exit, group)?;
    self.expect_end()?;
    Ok(exit)
  }

  fn parse_let(&mut self) -> CompileResult<NodeId> {
    let decl = self.alloc_current();

    let name = self.stream.peek();
    if name.kind != TokenKind::Identifier {
      return Err(CompileError::parse(
        name,
        format!(
          "expected identifier after 'let', but got '{}'",
          name.describe()
        ),
      ));
    }
    let ident = self.alloc_current();

    let eq = self.stream.peek();
    if !eq.is("=") {
      return Err(CompileError::parse(
        eq,
        format!("expected '=' in declaration, but got '{}'", eq.describe()),
      ));
    }
    let assign = self.alloc_current();
    let value = self.parse_expr(0)?;

    self.arena.link_left(assign, ident)?;
    self.arena.link_right(assign, value)?;
    self.arena.link_left(decl, assign)?;
    self.expect_end()?;
    Ok(decl)
  }

  /// `if` chain: `if -> { -> elif -> { -> else -> {`, linked through the
  /// `right` slots. Returns the `if` node and the last block.
  fn parse_if(&mut self) -> CompileResult<(NodeId, NodeId)> {
    let head = self.alloc_current();
    let cond = self.parse_expr(0)?;
    self.arena.link_left(head, cond)?;
    let mut tail = self.parse_clause_block(head, "if")?;

    loop {
      self.stream.skip_newlines();
      let token = self.stream.peek();
      if token.is("elif") {
        let clause = self.alloc_current();
        let cond = self.parse_expr(0)?;
        self.arena.link_left(clause, cond)?;
        self.arena.link_right(tail, clause)?;
        tail = self.parse_clause_block(clause, "elif")?;
      } else if token.is("else") {
        let clause = self.alloc_current();
        self.arena.link_right(tail, clause)?;
        tail = self.parse_clause_block(clause, "else")?;
        break;
      } else {
        break;
      }
    }

    Ok((head, tail))
  }

  fn parse_clause_block(&mut self, clause: NodeId, keyword: &str) -> CompileResult<NodeId> {
    self.stream.skip_newlines();
    let token = self.stream.peek();
    if !token.is("{") {
      return Err(CompileError::parse(
        token,
        format!(
          "expected '{{' after '{keyword}', but got '{}'",
          token.describe()
        ),
      ));
    }
    let block = self.parse_block()?;
    self.arena.link_right(clause, block)?;
    Ok(block)
  }

  fn parse_block(&mut self) -> CompileResult<NodeId> {
    self.enter()?;
    let block = self.alloc_current();
    let body = self.parse_statements(true)?;
    self.arena.link_left(block, body)?;
    self.leave();
    Ok(block)
  }

  /// Precedence climbing: parse an atom, then absorb every operator binding
  /// at least as tightly as `min_prec`.
  fn parse_expr(&mut self, min_prec: u8) -> CompileResult<NodeId> {
    let mut lhs = self.parse_atom()?;

    loop {
      if self.paren_depth > 0 {
        self.stream.skip_newlines();
      }
      let token = self.stream.peek();
      if token.kind != TokenKind::Operator {
        break;
      }
      let Some(op) = BinaryOp::from_symbol(&token.text) else {
        break;
      };
      if op.precedence() < min_prec {
        break;
      }

      let op_node = self.alloc_current();
      let rhs = self.parse_expr(op.precedence() + 1)?;
      self.arena.link_left(op_node, lhs)?;
      self.arena.link_right(op_node, rhs)?;
      lhs = op_node;
    }

    Ok(lhs)
  }

  fn parse_atom(&mut self) -> CompileResult<NodeId> {
    if self.paren_depth > 0 {
      self.stream.skip_newlines();
    }
    let token = self.stream.peek();

    match token.kind {
      TokenKind::IntLiteral => {
        if token.text.parse::<i64>().is_err() {
          return Err(CompileError::parse(
            token,
            format!("integer literal '{}' out of range", token.text),
          ));
        }
        Ok(self.alloc_current())
      }
      TokenKind::Identifier => Ok(self.alloc_current()),
      TokenKind::Punctuation if token.is("(") => self.parse_group(),
      _ => Err(CompileError::parse(
        token,
        format!("expected expression, but got '{}'", token.describe()),
      )),
    }
  }

  /// `( expr )`: the group node holds the expression on the left and the
  /// closing parenthesis on the right.
  fn parse_group(&mut self) -> CompileResult<NodeId> {
    self.enter()?;
    let group = self.alloc_current();
    self.paren_depth += 1;
    let inner = self.parse_expr(0)?;
    self.stream.skip_newlines();
    self.paren_depth -= 1;

    let close = self.stream.peek();
    if !close.is(")") {
      return Err(CompileError::parse(
        close,
        format!("expected ')', but got '{}'", close.describe()),
      ));
    }
    let close = self.alloc_current();
    self.arena.link_left(group, inner)?;
    self.arena.link_right(group, close)?;
    self.leave();
    Ok(group)
  }
}

/// Lightweight cursor over the token vector. The final token is always EOF
/// and the cursor never moves past it.
struct TokenStream {
  tokens: Vec<Token>,
  pos: usize,
}

impl TokenStream {
  fn new(mut tokens: Vec<Token>) -> Self {
    if !tokens.last().is_some_and(Token::is_eof) {
      let (line, column, offset) = tokens
        .last()
        .map_or((1, 1, 0), |t| (t.line, t.column + t.text.len(), t.offset + t.text.len()));
      tokens.push(Token::new(TokenKind::Eof, "", line, column, offset));
    }
    Self { tokens, pos: 0 }
  }

  fn peek(&self) -> &Token {
    &self.tokens[self.pos]
  }

  /// Take the current token and advance, staying on EOF once reached.
  fn next(&mut self) -> Token {
    let token = self.tokens[self.pos].clone();
    if self.pos + 1 < self.tokens.len() {
      self.pos += 1;
    }
    token
  }

  fn skip_terminators(&mut self) {
    while self.peek().kind == TokenKind::Terminator {
      self.pos += 1;
    }
  }

  fn skip_newlines(&mut self) {
    while self.peek().kind == TokenKind::Terminator && self.peek().text == "\n" {
      self.pos += 1;
    }
  }
}

enum Piece<'a> {
  Node(NodeId),
  Text(&'a str),
}

/// Print an expression fully parenthesised, e.g. `(1 + (2 * 3))`.
pub fn render_expr(arena: &NodeArena, id: NodeId) -> String {
  let side = |child: Option<NodeId>| child.map_or(Piece::Text("?"), Piece::Node);
  let mut out = String::new();
  let mut work = vec![Piece::Node(id)];

  // Pieces are pushed in reverse so they pop in reading order.
  while let Some(piece) = work.pop() {
    let id = match piece {
      Piece::Text(text) => {
        out.push_str(text);
        continue;
      }
      Piece::Node(id) => id,
    };
    let node = arena.get(id);
    match node.token.kind {
      TokenKind::Operator => work.extend([
        Piece::Text(")"),
        side(node.right),
        Piece::Text(" "),
        Piece::Text(&node.token.text),
        Piece::Text(" "),
        side(node.left),
        Piece::Text("("),
      ]),
      TokenKind::Punctuation if node.token.is("(") => work.push(side(node.left)),
      TokenKind::Punctuation if node.token.is("=") => {
        work.extend([side(node.right), Piece::Text(" = "), side(node.left)]);
      }
      _ => out.push_str(&node.token.text),
    }
  }
  out
}

/// Indented dump of the whole tree. Statement chains stay at one level;
/// `left` children and expression operands are indented beneath their node.
pub fn dump_tree(arena: &NodeArena, root: NodeId) -> String {
  let mut out = String::new();
  // (node, depth) of every chain still to print, innermost last.
  let mut work = vec![(root, 0)];

  while let Some((id, depth)) = work.pop() {
    let node = arena.get(id);
    out.push_str(&"  ".repeat(depth));
    out.push_str(&node.token.describe());
    out.push('\n');

    if let Some(right) = node.right {
      let right_depth = if continues_chain(&node.token) { depth } else { depth + 1 };
      work.push((right, right_depth));
    }
    if let Some(left) = node.left {
      work.push((left, depth + 1));
    }
  }
  out
}

fn continues_chain(token: &Token) -> bool {
  matches!(token.kind, TokenKind::Keyword | TokenKind::Eof) || token.is("{") || token.is("}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;
  use crate::tokenizer::tokenize;

  fn parse_source(source: &str) -> CompileResult<(NodeArena, NodeId)> {
    let mut arena = NodeArena::new();
    let root = parse(tokenize(source)?, &mut arena)?;
    Ok((arena, root))
  }

  fn text(arena: &NodeArena, id: Option<NodeId>) -> String {
    id.map(|id| arena.get(id).token.describe()).unwrap_or_default()
  }

  /// Value expression of a `let` statement.
  fn let_value(arena: &NodeArena, decl: NodeId) -> NodeId {
    let assign = arena.get(decl).left.unwrap();
    arena.get(assign).right.unwrap()
  }

  #[test]
  fn multiplication_binds_tighter() {
    let (arena, root) = parse_source("let x = 1 + 2 * 3\n").unwrap();
    let value = let_value(&arena, root);
    assert_eq!(arena.get(value).token.text, "+");
    assert_eq!(text(&arena, arena.get(value).right), "*");
    assert_eq!(render_expr(&arena, value), "(1 + (2 * 3))");
  }

  #[test]
  fn operators_are_left_associative() {
    let (arena, root) = parse_source("let x = 10 - 3 - 2 / 2 / 1").unwrap();
    assert_eq!(
      render_expr(&arena, let_value(&arena, root)),
      "((10 - 3) - ((2 / 2) / 1))"
    );
  }

  #[test]
  fn parentheses_override_precedence() {
    let (arena, root) = parse_source("let x = (1 + 2) * 3").unwrap();
    let value = let_value(&arena, root);
    assert_eq!(arena.get(value).token.text, "*");
    assert_eq!(render_expr(&arena, value), "((1 + 2) * 3)");
    let group = arena.get(value).left.unwrap();
    assert_eq!(text(&arena, arena.get(group).right), ")");
  }

  #[test]
  fn statement_chain_ends_in_eof() {
    let (arena, root) = parse_source("let a = 1\nexit(a)\n").unwrap();
    let chain: Vec<String> = arena
      .chain(root)
      .map(|id| arena.get(id).token.describe())
      .collect();
    assert_eq!(chain, ["let", "exit", "EOF"]);
  }

  #[test]
  fn empty_program_is_just_eof() {
    let (arena, root) = parse_source("\n// nothing here\n").unwrap();
    assert!(arena.get(root).token.is_eof());
    assert_eq!(arena.len(), 1);
  }

  #[test]
  fn parents_are_allocated_before_bodies() {
    let (arena, root) = parse_source("{ exit(1) }").unwrap();
    let body = arena.get(root).left.unwrap();
    assert!(root < body);
    assert_eq!(arena.get(body).token.text, "exit");
    assert_eq!(text(&arena, arena.get(body).right), "}");
    assert_eq!(text(&arena, arena.get(root).right), "EOF");
  }

  #[test]
  fn if_chain_links_clauses_through_blocks() {
    let source = "if x {\n exit(1)\n}\nelif y\n{\n exit(2)\n} else {\n exit(3)\n}\nexit(4)\n";
    let (arena, root) = parse_source(source).unwrap();
    let chain: Vec<String> = arena
      .chain(root)
      .map(|id| arena.get(id).token.describe())
      .collect();
    assert_eq!(chain, ["if", "{", "elif", "{", "else", "{", "exit", "EOF"]);
    assert_eq!(text(&arena, arena.get(root).left), "x");
  }

  #[test]
  fn newlines_inside_parentheses_are_ignored() {
    let (arena, root) = parse_source("exit(1 +\n 2\n)\n").unwrap();
    let group = arena.get(root).left.unwrap();
    assert_eq!(render_expr(&arena, group), "(1 + 2)");
  }

  #[test]
  fn semicolons_separate_statements() {
    let (arena, root) = parse_source("let a = 1; let b = 2; exit(b)").unwrap();
    assert_eq!(arena.chain(root).count(), 4);
  }

  #[test]
  fn dump_tree_indents_children() {
    let (arena, root) = parse_source("exit(1 + 2)\n").unwrap();
    assert_eq!(
      dump_tree(&arena, root),
      "exit\n  (\n    +\n      1\n      2\n    )\nEOF\n"
    );
  }

  #[test]
  fn dump_tree_keeps_chains_flat() {
    let (arena, root) = parse_source("let x = 2 - 1\n{\n    exit(x)\n}\n").unwrap();
    assert_eq!(
      dump_tree(&arena, root),
      "let\n  =\n    x\n    -\n      2\n      1\n{\n  exit\n    (\n      x\n      )\n  }\nEOF\n"
    );
  }

  #[test]
  fn long_chains_render_without_recursion() {
    let source = format!("exit({})\n", vec!["1"; 200_000].join(" + "));
    let (arena, root) = parse_source(&source).unwrap();
    let group = arena.get(root).left.unwrap();
    let rendered = render_expr(&arena, group);
    assert!(rendered.starts_with(&"(".repeat(199_999)));
    assert!(rendered.ends_with(") + 1)"));
    let dump = dump_tree(&arena, root);
    assert_eq!(dump.lines().count(), 1 + 1 + 199_999 + 200_000 + 1 + 1);
  }

  fn parse_error(source: &str) -> CompileError {
    let err = parse_source(source).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse, "{err}");
    err
  }

  #[test]
  fn missing_close_paren() {
    let err = parse_error("exit(1 + 2\n");
    assert!(err.message().starts_with("expected ')'"), "{err}");
  }

  #[test]
  fn closing_brace_outside_block() {
    let err = parse_error("exit(0)\n}\n");
    assert_eq!(err.message(), "unexpected closing brace");
    assert_eq!(err.position(), Some((2, 1)));
  }

  #[test]
  fn unterminated_block() {
    let err = parse_error("{\nexit(1)\n");
    assert!(err.message().starts_with("expected '}'"), "{err}");
  }

  #[test]
  fn malformed_declarations() {
    assert!(parse_error("let = 4").message().starts_with("expected identifier"));
    assert!(parse_error("let 5 = 4").message().starts_with("expected identifier"));
    assert!(parse_error("let x 4").message().starts_with("expected '='"));
  }

  #[test]
  fn if_requires_a_block() {
    let err = parse_error("if 1 exit(1)");
    assert!(err.message().starts_with("expected '{' after 'if'"), "{err}");
    let err = parse_error("if 1 { } else exit(1)");
    assert!(err.message().starts_with("expected '{' after 'else'"), "{err}");
  }

  #[test]
  fn stray_else_is_rejected() {
    let err = parse_error("else { exit(1) }");
    assert_eq!(err.message(), "'else' without a matching 'if'");
  }

  #[test]
  fn unknown_statement_start() {
    let err = parse_error("x = 4\n");
    assert_eq!(err.message(), "unexpected 'x' at start of statement");
  }

  #[test]
  fn trailing_tokens_after_statement() {
    let err = parse_error("exit(1) 2\n");
    assert!(err.message().starts_with("expected terminator"), "{err}");
  }

  #[test]
  fn missing_operand() {
    let err = parse_error("exit(1 + )");
    assert_eq!(err.message(), "expected expression, but got ')'");
  }

  #[test]
  fn literal_out_of_range() {
    let err = parse_error("exit(99999999999999999999)");
    assert!(err.message().contains("out of range"), "{err}");
  }

  #[test]
  fn nesting_is_bounded() {
    let deep = format!("exit({}1{})", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
    let err = parse_error(&deep);
    assert!(err.message().starts_with("nesting too deep"), "{err}");

    let ok = format!("exit({}1{})", "(".repeat(10), ")".repeat(10));
    assert!(parse_source(&ok).is_ok());
  }
}
