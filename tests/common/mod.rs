//! A tiny interpreter for the NASM subset `hydroc` emits, so tests can check
//! what a compiled program would exit with without assembling it.
#![allow(dead_code)]

use std::collections::HashMap;

const STEP_LIMIT: usize = 1_000_000;

#[derive(Default)]
struct Registers {
  rax: i64,
  rdi: i64,
}

impl Registers {
  fn get(&self, name: &str) -> Result<i64, String> {
    match name {
      "rax" => Ok(self.rax),
      "rdi" => Ok(self.rdi),
      other => Err(format!("unknown register '{other}'")),
    }
  }

  fn get_mut(&mut self, name: &str) -> Result<&mut i64, String> {
    match name {
      "rax" => Ok(&mut self.rax),
      "rdi" => Ok(&mut self.rdi),
      other => Err(format!("unknown register '{other}'")),
    }
  }
}

fn slot_offset(operand: &str) -> Option<usize> {
  operand
    .strip_prefix("QWORD [rsp + ")?
    .strip_suffix(']')?
    .parse()
    .ok()
}

/// Run `asm` and return the status passed to the `exit` syscall.
pub fn run(asm: &str) -> Result<i64, String> {
  let lines: Vec<&str> = asm
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .collect();
  let labels: HashMap<&str, usize> = lines
    .iter()
    .enumerate()
    .filter_map(|(i, line)| line.strip_suffix(':').map(|name| (name, i)))
    .collect();
  let target = |label: &str| {
    labels
      .get(label)
      .copied()
      .ok_or_else(|| format!("unknown label '{label}'"))
  };

  let mut regs = Registers::default();
  let mut stack: Vec<i64> = Vec::new();
  let mut zero_flag = false;
  let mut pc = 0;

  for _ in 0..STEP_LIMIT {
    let Some(&line) = lines.get(pc) else {
      return Err("ran past the last instruction".into());
    };
    pc += 1;
    if line.ends_with(':') || line.starts_with("global ") {
      continue;
    }

    let (op, operands) = line.split_once(' ').unwrap_or((line, ""));
    let args: Vec<&str> = if operands.is_empty() {
      Vec::new()
    } else {
      operands.split(", ").collect()
    };

    match (op, args.as_slice()) {
      ("mov", [reg, imm]) => {
        let value = imm
          .parse::<i64>()
          .map_err(|_| format!("bad immediate in '{line}'"))?;
        *regs.get_mut(reg)? = value;
      }
      ("push", [operand]) => {
        let value = match slot_offset(operand) {
          Some(offset) => {
            let index = stack
              .len()
              .checked_sub(1 + offset / 8)
              .ok_or_else(|| format!("read below the stack in '{line}'"))?;
            stack[index]
          }
          None => regs.get(operand)?,
        };
        stack.push(value);
      }
      ("pop", [reg]) => {
        let value = stack.pop().ok_or("pop from empty stack")?;
        *regs.get_mut(reg)? = value;
      }
      ("add", ["rsp", bytes]) => {
        let bytes: usize = bytes
          .parse()
          .map_err(|_| format!("bad size in '{line}'"))?;
        let len = stack
          .len()
          .checked_sub(bytes / 8)
          .ok_or("released more than the stack holds")?;
        stack.truncate(len);
      }
      ("add", [dst, src]) => {
        let value = regs.get(src)?;
        let dst = regs.get_mut(dst)?;
        *dst = dst.wrapping_add(value);
      }
      ("sub", [dst, src]) => {
        let value = regs.get(src)?;
        let dst = regs.get_mut(dst)?;
        *dst = dst.wrapping_sub(value);
      }
      ("imul", [dst, src]) => {
        let value = regs.get(src)?;
        let dst = regs.get_mut(dst)?;
        *dst = dst.wrapping_mul(value);
      }
      ("cqo", []) => {}
      ("idiv", [reg]) => {
        let divisor = regs.get(reg)?;
        if divisor == 0 {
          return Err("division by zero".into());
        }
        regs.rax = regs.rax.wrapping_div(divisor);
      }
      ("test", [a, b]) => zero_flag = regs.get(a)? & regs.get(b)? == 0,
      ("jz", [label]) => {
        if zero_flag {
          pc = target(*label)?;
        }
      }
      ("jmp", [label]) => pc = target(*label)?,
      ("syscall", []) => {
        if regs.rax != 60 {
          return Err(format!("unsupported syscall {}", regs.rax));
        }
        return Ok(regs.rdi);
      }
      _ => return Err(format!("unsupported instruction '{line}'")),
    }
  }
  Err("step limit exceeded".into())
}

/// Compile `source` with default options and run it.
pub fn exit_code(source: &str) -> i64 {
  let asm = hydroc::compile(source).unwrap_or_else(|err| panic!("{}", err.render(source)));
  run(&asm).unwrap_or_else(|err| panic!("{err}\n{asm}"))
}
