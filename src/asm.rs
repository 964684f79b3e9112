//! Instruction text for the two assembler dialects we can target.
//!
//! The generator only thinks in terms of stack-machine operations; `Emitter`
//! turns each of them into lines of either NASM (Intel) or GNU as (AT&T)
//! syntax. Instructions are indented by four spaces, labels are flush left.

use std::fmt;
use std::str::FromStr;

use crate::parser::BinaryOp;

/// Size in bytes of one operand-stack slot.
pub const WORD_SIZE: usize = 8;

/// Linux x86-64 syscall number of `exit`.
pub const SYS_EXIT: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Syntax {
  /// Intel syntax for `nasm -felf64`.
  #[default]
  Nasm,
  /// AT&T syntax for GNU `as`.
  Gas,
}

impl FromStr for Syntax {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "nasm" | "intel" => Ok(Self::Nasm),
      "gas" | "att" => Ok(Self::Gas),
      other => Err(format!("unknown assembly syntax '{other}' (expected nasm or gas)")),
    }
  }
}

impl fmt::Display for Syntax {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Nasm => f.write_str("nasm"),
      Self::Gas => f.write_str("gas"),
    }
  }
}

#[derive(Debug, Clone, Copy)]
enum Reg {
  Rax,
  Rdi,
}

impl Reg {
  fn name(self, syntax: Syntax) -> &'static str {
    match (self, syntax) {
      (Reg::Rax, Syntax::Nasm) => "rax",
      (Reg::Rdi, Syntax::Nasm) => "rdi",
      (Reg::Rax, Syntax::Gas) => "%rax",
      (Reg::Rdi, Syntax::Gas) => "%rdi",
    }
  }
}

/// Accumulates assembly text for one compilation.
pub struct Emitter {
  syntax: Syntax,
  asm: String,
}

impl Emitter {
  pub fn new(syntax: Syntax) -> Self {
    Self {
      syntax,
      asm: String::new(),
    }
  }

  pub fn finish(self) -> String {
    self.asm
  }

  fn line(&mut self, instr: &str) {
    self.asm.push_str("    ");
    self.asm.push_str(instr);
    self.asm.push('\n');
  }

  fn mov_imm(&mut self, reg: Reg, value: i64) {
    let instr = match self.syntax {
      Syntax::Nasm => format!("mov {}, {value}", reg.name(self.syntax)),
      Syntax::Gas => format!("mov ${value}, {}", reg.name(self.syntax)),
    };
    self.line(&instr);
  }

  fn push(&mut self, reg: Reg) {
    let instr = format!("push {}", reg.name(self.syntax));
    self.line(&instr);
  }

  fn pop(&mut self, reg: Reg) {
    let instr = format!("pop {}", reg.name(self.syntax));
    self.line(&instr);
  }

  /// Entry-point declaration and label.
  pub fn entry(&mut self) {
    match self.syntax {
      Syntax::Nasm => self.asm.push_str("global _start\n"),
      Syntax::Gas => self.asm.push_str(".globl _start\n"),
    }
    self.asm.push_str("_start:\n");
  }

  pub fn label(&mut self, name: &str) {
    self.asm.push_str(name);
    self.asm.push_str(":\n");
  }

  pub fn push_imm(&mut self, value: i64) {
    self.mov_imm(Reg::Rax, value);
    self.push(Reg::Rax);
  }

  /// Push a copy of the slot `offset` bytes above the stack top.
  pub fn push_slot(&mut self, offset: usize) {
    let instr = match self.syntax {
      Syntax::Nasm => format!("push QWORD [rsp + {offset}]"),
      Syntax::Gas => format!("pushq {offset}(%rsp)"),
    };
    self.line(&instr);
  }

  /// Pop right then left operand, combine them as `left op right` and push
  /// the result.
  pub fn binary(&mut self, op: BinaryOp) {
    self.pop(Reg::Rdi);
    self.pop(Reg::Rax);
    let (rax, rdi) = (Reg::Rax.name(self.syntax), Reg::Rdi.name(self.syntax));
    let mnemonic = match op {
      BinaryOp::Add => "add",
      BinaryOp::Sub => "sub",
      BinaryOp::Mul => "imul",
      BinaryOp::Div => {
        self.line("cqo");
        self.line(&format!("idiv {rdi}"));
        self.push(Reg::Rax);
        return;
      }
    };
    let instr = match self.syntax {
      Syntax::Nasm => format!("{mnemonic} {rax}, {rdi}"),
      Syntax::Gas => format!("{mnemonic} {rdi}, {rax}"),
    };
    self.line(&instr);
    self.push(Reg::Rax);
  }

  /// Pop the stack top and jump to `label` if it is zero.
  pub fn branch_if_zero(&mut self, label: &str) {
    self.pop(Reg::Rax);
    let rax = Reg::Rax.name(self.syntax);
    self.line(&format!("test {rax}, {rax}"));
    self.line(&format!("jz {label}"));
  }

  pub fn jump(&mut self, label: &str) {
    self.line(&format!("jmp {label}"));
  }

  /// Drop `slots` operand-stack slots.
  pub fn release(&mut self, slots: usize) {
    let bytes = slots * WORD_SIZE;
    let instr = match self.syntax {
      Syntax::Nasm => format!("add rsp, {bytes}"),
      Syntax::Gas => format!("add ${bytes}, %rsp"),
    };
    self.line(&instr);
  }

  /// `exit` syscall with the popped stack top as status.
  pub fn exit_with_top(&mut self) {
    self.mov_imm(Reg::Rax, SYS_EXIT);
    self.pop(Reg::Rdi);
    self.line("syscall");
  }

  /// `exit` syscall with a constant status.
  pub fn exit_with(&mut self, code: i64) {
    self.mov_imm(Reg::Rax, SYS_EXIT);
    self.mov_imm(Reg::Rdi, code);
    self.line("syscall");
  }
}
