//! Code generation: lower the parsed tree into x86-64 assembly.
//!
//! The emitter uses a simple stack machine: every expression leaves a single
//! value on the stack, and a `let` binding is nothing more than the slot its
//! value was pushed into. The generator mirrors the hardware stack with a
//! counter so a variable can be read back as `[rsp + (depth - slot) * 8]`,
//! and keeps one scope table per open block so the slots a block pushed are
//! released when it closes.

use std::collections::HashMap;

use log::{debug, trace};

use crate::arena::{Node, NodeArena, NodeId};
use crate::asm::{Emitter, Syntax, WORD_SIZE};
use crate::error::{CompileError, CompileResult};
use crate::parser::BinaryOp;
use crate::tokenizer::{Token, TokenKind};

/// Lower the program rooted at `root` into assembly text.
pub fn generate(arena: &NodeArena, root: NodeId, syntax: Syntax) -> CompileResult<String> {
  let mut generator = Generator::new(arena, syntax);
  generator.run(root)?;
  let asm = generator.finish();
  debug!("generated {} bytes of {syntax} assembly", asm.len());
  Ok(asm)
}

/// Bindings introduced by one block, plus the stack depth on entry.
#[derive(Debug, Default)]
struct Scope {
  bindings: HashMap<String, usize>,
  entry_stack_pointer: usize,
}

/// Pending work for the expression walk.
enum Work {
  Visit(NodeId),
  Apply(BinaryOp),
}

pub struct Generator<'a> {
  arena: &'a NodeArena,
  out: Emitter,
  stack_pointer: usize,
  scopes: Vec<Scope>,
  label_counter: usize,
}

impl<'a> Generator<'a> {
  pub fn new(arena: &'a NodeArena, syntax: Syntax) -> Self {
    Self {
      arena,
      out: Emitter::new(syntax),
      stack_pointer: 0,
      scopes: vec![Scope::default()],
      label_counter: 0,
    }
  }

  /// Number of values the generated code currently has on the stack.
  pub fn stack_pointer(&self) -> usize {
    self.stack_pointer
  }

  /// Open scopes, the root scope included.
  pub fn scope_depth(&self) -> usize {
    self.scopes.len()
  }

  pub fn finish(self) -> String {
    self.out.finish()
  }

  /// Emit the entry point followed by the statement chain starting at `root`.
  pub fn run(&mut self, root: NodeId) -> CompileResult<()> {
    self.out.entry();
    self.gen_statements(root)
  }

  fn new_label(&mut self) -> String {
    let label = format!(".L{}", self.label_counter);
    self.label_counter += 1;
    label
  }

  fn push_slot(&mut self) {
    self.stack_pointer += 1;
  }

  fn pop_slot(&mut self, token: &Token) -> CompileResult<()> {
    self.stack_pointer = self.stack_pointer.checked_sub(1).ok_or_else(|| {
      CompileError::internal(format!(
        "operand stack underflow at {}:{}",
        token.line, token.column
      ))
    })?;
    Ok(())
  }

  /// The statement after `node`. Statement chains must end at EOF or `}`.
  fn next_statement(&self, node: &Node) -> CompileResult<NodeId> {
    node.right.ok_or_else(|| {
      CompileError::codegen(
        &node.token,
        format!(
          "'{}' is not followed by another statement, EOF or '}}'",
          node.token.describe()
        ),
      )
    })
  }

  /// Walk a statement chain until its EOF (program end) or `}` (block end).
  fn gen_statements(&mut self, start: NodeId) -> CompileResult<()> {
    let arena = self.arena;
    let mut current = start;

    loop {
      let node = arena.get(current);
      let token = &node.token;
      trace!(
        "statement '{}' with stack depth {}",
        token.describe(),
        self.stack_pointer
      );

      current = match (token.kind, token.text.as_str()) {
        (TokenKind::Eof, _) => {
          self.out.exit_with(0);
          return Ok(());
        }
        (TokenKind::Punctuation, "}") => return self.exit_scope(token),
        (TokenKind::Keyword, "exit") => {
          self.gen_exit(node)?;
          self.next_statement(node)?
        }
        (TokenKind::Keyword, "let") => {
          self.gen_let(node)?;
          self.next_statement(node)?
        }
        (TokenKind::Keyword, "if") => self.gen_if(node)?,
        (TokenKind::Punctuation, "{") => {
          self.gen_block(current)?;
          self.next_statement(node)?
        }
        _ => {
          return Err(CompileError::codegen(
            token,
            format!("expected statement, but got '{}'", token.describe()),
          ));
        }
      };
    }
  }

  fn gen_exit(&mut self, node: &Node) -> CompileResult<()> {
    let arena = self.arena;
    let Some(group) = node.left.filter(|id| arena.get(*id).token.is("(")) else {
      return Err(CompileError::codegen(&node.token, "expected '(' after 'exit'"));
    };
    self.gen_expr(group)?;
    self.out.exit_with_top();
    self.pop_slot(&node.token)
  }

  fn gen_let(&mut self, node: &Node) -> CompileResult<()> {
    let arena = self.arena;
    let Some(assign) = node.left.map(|id| arena.get(id)).filter(|n| n.token.is("=")) else {
      return Err(CompileError::codegen(&node.token, "expected '=' in declaration"));
    };
    let Some(ident) = assign
      .left
      .map(|id| &arena.get(id).token)
      .filter(|t| t.kind == TokenKind::Identifier)
    else {
      return Err(CompileError::codegen(&assign.token, "improper declaration"));
    };
    let Some(value) = assign.right else {
      return Err(CompileError::codegen(&assign.token, "declaration has no value"));
    };

    self.gen_expr(value)?;

    let slot = self.stack_pointer;
    let Some(scope) = self.scopes.last_mut() else {
      return Err(CompileError::internal("no scope to declare into"));
    };
    trace!("bind '{}' to slot {slot}", ident.text);
    scope.bindings.insert(ident.text.clone(), slot);
    Ok(())
  }

  /// Pop a condition and branch to a fresh label when it is zero. Returns
  /// that label.
  fn gen_condition(&mut self, clause: &Node) -> CompileResult<String> {
    let Some(cond) = clause.left else {
      return Err(CompileError::codegen(
        &clause.token,
        format!("'{}' without a condition", clause.token.text),
      ));
    };
    self.gen_expr(cond)?;
    let label = self.new_label();
    self.out.branch_if_zero(&label);
    self.pop_slot(&clause.token)?;
    Ok(label)
  }

  /// Generate the block hanging off a clause's `right` slot and return the
  /// node that follows it.
  fn gen_clause_block(&mut self, clause: &Node) -> CompileResult<&'a Node> {
    let arena = self.arena;
    let Some(block) = clause.right.filter(|id| arena.get(*id).token.is("{")) else {
      return Err(CompileError::codegen(
        &clause.token,
        format!("expected '{{' after '{}'", clause.token.text),
      ));
    };
    self.gen_block(block)?;
    Ok(arena.get(block))
  }

  /// `if` / `elif` / `else` chain. Returns the statement after the chain.
  fn gen_if(&mut self, head: &Node) -> CompileResult<NodeId> {
    let arena = self.arena;
    let mut pending_false = Some(self.gen_condition(head)?);
    let mut block = self.gen_clause_block(head)?;
    let mut end_label: Option<String> = None;

    loop {
      let next = arena.get(self.next_statement(block)?);
      let is_elif = next.token.kind == TokenKind::Keyword && next.token.is("elif");
      let is_else = next.token.kind == TokenKind::Keyword && next.token.is("else");
      if !is_elif && !is_else {
        break;
      }

      let end = match &end_label {
        Some(label) => label.clone(),
        None => {
          let label = self.new_label();
          end_label = Some(label.clone());
          label
        }
      };
      self.out.jump(&end);
      if let Some(label) = pending_false.take() {
        self.out.label(&label);
      }
      if is_elif {
        pending_false = Some(self.gen_condition(next)?);
      }
      block = self.gen_clause_block(next)?;
      if is_else {
        break;
      }
    }

    if let Some(label) = pending_false {
      self.out.label(&label);
    }
    if let Some(label) = end_label {
      self.out.label(&label);
    }
    self.next_statement(block)
  }

  fn gen_block(&mut self, id: NodeId) -> CompileResult<()> {
    let node = self.arena.get(id);
    let Some(body) = node.left else {
      return Err(CompileError::codegen(&node.token, "block has no body"));
    };

    let depth = self.scopes.len();
    self.enter_scope();
    self.gen_statements(body)?;
    if self.scopes.len() != depth {
      return Err(CompileError::codegen(&node.token, "block is not closed by '}'"));
    }
    Ok(())
  }

  fn enter_scope(&mut self) {
    trace!(
      "enter scope {} at stack depth {}",
      self.scopes.len(),
      self.stack_pointer
    );
    self.scopes.push(Scope {
      bindings: HashMap::new(),
      entry_stack_pointer: self.stack_pointer,
    });
  }

  /// Close the innermost scope, releasing every slot pushed since it opened.
  fn exit_scope(&mut self, token: &Token) -> CompileResult<()> {
    // The root scope lives for the whole program.
    let scope = match self.scopes.len() {
      0 | 1 => None,
      _ => self.scopes.pop(),
    };
    let Some(scope) = scope else {
      return Err(CompileError::codegen(token, "no scope to exit"));
    };

    let Some(diff) = self.stack_pointer.checked_sub(scope.entry_stack_pointer) else {
      return Err(CompileError::internal(format!(
        "stack depth {} fell below scope entry {}",
        self.stack_pointer, scope.entry_stack_pointer
      )));
    };
    if diff > 0 {
      self.out.release(diff);
      self.stack_pointer = scope.entry_stack_pointer;
    }
    trace!("exit scope {}, released {diff} slots", self.scopes.len());
    Ok(())
  }

  fn lookup(&self, name: &str) -> Option<usize> {
    self
      .scopes
      .iter()
      .rev()
      .find_map(|scope| scope.bindings.get(name).copied())
  }

  /// Post-order walk of an expression using an explicit work stack, so
  /// long operator chains cannot exhaust the call stack.
  fn gen_expr(&mut self, root: NodeId) -> CompileResult<()> {
    let arena = self.arena;
    let mut work = vec![Work::Visit(root)];

    while let Some(item) = work.pop() {
      let id = match item {
        Work::Apply(op) => {
          self.out.binary(op);
          // Two operands in, one result out.
          self.stack_pointer -= 1;
          continue;
        }
        Work::Visit(id) => id,
      };

      let node = arena.get(id);
      let token = &node.token;
      match token.kind {
        TokenKind::IntLiteral => {
          let value = token.text.parse::<i64>().map_err(|_| {
            CompileError::codegen(
              token,
              format!("integer literal '{}' out of range", token.text),
            )
          })?;
          self.out.push_imm(value);
          self.push_slot();
        }
        TokenKind::Identifier => {
          let Some(slot) = self.lookup(&token.text) else {
            return Err(CompileError::codegen(
              token,
              format!("undeclared identifier '{}'", token.text),
            ));
          };
          let Some(distance) = self.stack_pointer.checked_sub(slot) else {
            return Err(CompileError::internal(format!(
              "'{}' bound above the stack top",
              token.text
            )));
          };
          let offset = distance * WORD_SIZE;
          trace!("read '{}' from slot {slot} at [rsp + {offset}]", token.text);
          self.out.push_slot(offset);
          self.push_slot();
        }
        TokenKind::Operator => {
          let Some(op) = BinaryOp::from_symbol(&token.text) else {
            return Err(CompileError::codegen(
              token,
              format!("invalid binary operator '{}'", token.text),
            ));
          };
          let (Some(lhs), Some(rhs)) = (node.left, node.right) else {
            return Err(CompileError::codegen(
              token,
              format!("malformed operator node '{}': missing operand", token.text),
            ));
          };
          work.push(Work::Apply(op));
          work.push(Work::Visit(rhs));
          work.push(Work::Visit(lhs));
        }
        TokenKind::Punctuation if token.is("(") => {
          if !node.right.is_some_and(|close| arena.get(close).token.is(")")) {
            return Err(CompileError::codegen(token, "expected ')'"));
          }
          let Some(inner) = node.left else {
            return Err(CompileError::codegen(token, "empty parentheses"));
          };
          work.push(Work::Visit(inner));
        }
        _ => {
          return Err(CompileError::codegen(
            token,
            format!("expected expression, but got '{}'", token.describe()),
          ));
        }
      }
    }
    Ok(())
  }
}
