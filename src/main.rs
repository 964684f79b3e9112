use std::env;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{self, Command, ExitStatus};

use hydroc::arena::NodeArena;
use hydroc::tokenizer::{Token, tokenize_bytes};
use hydroc::{CompileError, CompileOptions, Syntax, parser};
use log::info;
use snafu::{ResultExt, Snafu};

const USAGE: &str = "usage: hydroc <input.hy> [-o <out.asm>] [--syntax nasm|gas] \
                     [--emit asm|tokens|tree] [--assemble]";

#[derive(Debug, Snafu)]
enum DriverError {
  #[snafu(display("{message}\n{USAGE}"))]
  Usage { message: String },
  #[snafu(display("failed to read {}: {source}", path.display()))]
  ReadInput { path: PathBuf, source: io::Error },
  #[snafu(display("failed to write {}: {source}", path.display()))]
  WriteOutput { path: PathBuf, source: io::Error },
  #[snafu(display("{rendered}"))]
  Compile { rendered: String },
  #[snafu(display("failed to run {program}: {source}"))]
  Spawn { program: String, source: io::Error },
  #[snafu(display("{program} exited with {status}"))]
  Toolchain { program: String, status: ExitStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Emit {
  Asm,
  Tokens,
  Tree,
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
  input: PathBuf,
  output: Option<PathBuf>,
  syntax: Syntax,
  emit: Emit,
  assemble: bool,
}

fn usage<T>(message: impl Into<String>) -> Result<T, DriverError> {
  UsageSnafu {
    message: message.into(),
  }
  .fail()
}

/// Parse command-line arguments. `Ok(None)` means help was requested.
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<Args>, DriverError> {
  let mut input = None;
  let mut output = None;
  let mut syntax = Syntax::default();
  let mut emit = Emit::Asm;
  let mut assemble = false;

  while let Some(arg) = args.next() {
    match arg.as_str() {
      "-h" | "--help" => return Ok(None),
      "-o" | "--output" | "--syntax" | "--emit" => {
        let Some(value) = args.next() else {
          return usage(format!("missing value for {arg}"));
        };
        match arg.as_str() {
          "--syntax" => {
            syntax = match value.parse() {
              Ok(syntax) => syntax,
              Err(message) => return usage(message),
            }
          }
          "--emit" => {
            emit = match value.as_str() {
              "asm" => Emit::Asm,
              "tokens" => Emit::Tokens,
              "tree" => Emit::Tree,
              other => return usage(format!("unknown --emit value '{other}'")),
            }
          }
          _ => output = Some(PathBuf::from(value)),
        }
      }
      "--assemble" => assemble = true,
      flag if flag.starts_with('-') => return usage(format!("unknown argument {flag}")),
      path => {
        if input.is_some() {
          return usage(format!("unexpected extra input {path}"));
        }
        input = Some(PathBuf::from(path));
      }
    }
  }

  let Some(input) = input else {
    return usage("missing input file");
  };
  Ok(Some(Args {
    input,
    output,
    syntax,
    emit,
    assemble,
  }))
}

fn describe(token: &Token) -> String {
  format!(
    "{}:{}\t{:?}\t{}",
    token.line,
    token.column,
    token.kind,
    token.describe()
  )
}

fn run_tool(program: &str, args: &[&OsStr]) -> Result<(), DriverError> {
  info!("running {program} {args:?}");
  let status = Command::new(program)
    .args(args)
    .status()
    .context(SpawnSnafu { program })?;
  if !status.success() {
    return ToolchainSnafu { program, status }.fail();
  }
  Ok(())
}

/// Object file and executable paths for `--assemble`. The executable is the
/// input path without its extension; none of the paths may collide with the
/// input or the assembly file.
fn toolchain_paths(input: &Path, asm_path: &Path) -> Result<(PathBuf, PathBuf), DriverError> {
  let object = asm_path.with_extension("o");
  let executable = input.with_extension("");
  for (what, path) in [("object file", &object), ("executable", &executable)] {
    if path == input || path == asm_path {
      return usage(format!(
        "{what} {} would overwrite an input or output file",
        path.display()
      ));
    }
  }
  if object == executable {
    return usage(format!(
      "object file and executable would both be {}",
      object.display()
    ));
  }
  Ok((object, executable))
}

/// Assemble `asm_path` into `object` and link it into `executable`.
fn assemble(
  asm_path: &Path,
  object: &Path,
  executable: &Path,
  syntax: Syntax,
) -> Result<(), DriverError> {
  match syntax {
    Syntax::Nasm => run_tool(
      "nasm",
      &[
        OsStr::new("-felf64"),
        asm_path.as_os_str(),
        OsStr::new("-o"),
        object.as_os_str(),
      ],
    )?,
    Syntax::Gas => run_tool(
      "as",
      &[asm_path.as_os_str(), OsStr::new("-o"), object.as_os_str()],
    )?,
  }
  run_tool(
    "ld",
    &[object.as_os_str(), OsStr::new("-o"), executable.as_os_str()],
  )
}

fn run(args: Args) -> Result<(), DriverError> {
  let bytes = fs::read(&args.input).context(ReadInputSnafu {
    path: args.input.clone(),
  })?;
  let source = String::from_utf8_lossy(&bytes);
  let rendered = |err: CompileError| {
    CompileSnafu {
      rendered: err.render(&source),
    }
    .build()
  };

  match args.emit {
    Emit::Tokens => {
      for token in tokenize_bytes(&bytes).map_err(rendered)? {
        println!("{}", describe(&token));
      }
    }
    Emit::Tree => {
      let tokens = tokenize_bytes(&bytes).map_err(rendered)?;
      let mut arena = NodeArena::new();
      let root = parser::parse(tokens, &mut arena).map_err(rendered)?;
      print!("{}", parser::dump_tree(&arena, root));
    }
    Emit::Asm => {
      let options = CompileOptions {
        syntax: args.syntax,
      };
      let asm = hydroc::compile_bytes(&bytes, &options).map_err(rendered)?;
      let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_extension("asm"));
      let toolchain = if args.assemble {
        Some(toolchain_paths(&args.input, &output)?)
      } else {
        None
      };
      fs::write(&output, asm).context(WriteOutputSnafu {
        path: output.clone(),
      })?;
      info!("wrote {}", output.display());

      if let Some((object, executable)) = toolchain {
        assemble(&output, &object, &executable, args.syntax)?;
        info!("linked {}", executable.display());
      }
    }
  }
  Ok(())
}

fn main() {
  env_logger::init();

  let result = parse_args(env::args().skip(1)).and_then(|args| match args {
    Some(args) => run(args),
    None => {
      println!("{USAGE}");
      Ok(())
    }
  });

  if let Err(err) = result {
    eprintln!("{err}");
    let code = if matches!(err, DriverError::Usage { .. }) { 2 } else { 1 };
    process::exit(code);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(list: &[&str]) -> Result<Option<Args>, DriverError> {
    parse_args(list.iter().map(|s| s.to_string()))
  }

  #[test]
  fn defaults_to_nasm_assembly() {
    let parsed = args(&["prog.hy"]).unwrap().unwrap();
    assert_eq!(
      parsed,
      Args {
        input: PathBuf::from("prog.hy"),
        output: None,
        syntax: Syntax::Nasm,
        emit: Emit::Asm,
        assemble: false,
      }
    );
  }

  #[test]
  fn all_flags() {
    let parsed = args(&[
      "--syntax", "gas", "-o", "out.s", "--emit", "tree", "--assemble", "prog.hy",
    ])
    .unwrap()
    .unwrap();
    assert_eq!(parsed.syntax, Syntax::Gas);
    assert_eq!(parsed.output, Some(PathBuf::from("out.s")));
    assert_eq!(parsed.emit, Emit::Tree);
    assert!(parsed.assemble);
  }

  #[test]
  fn help_short_circuits() {
    assert!(args(&["--help", "--bogus"]).unwrap().is_none());
  }

  #[test]
  fn usage_errors() {
    for bad in [
      &[][..],
      &["a.hy", "b.hy"][..],
      &["a.hy", "--syntax"][..],
      &["a.hy", "--syntax", "masm"][..],
      &["a.hy", "--emit", "ir"][..],
      &["a.hy", "--verbose"][..],
    ] {
      let err = args(bad).unwrap_err();
      assert!(matches!(err, DriverError::Usage { .. }), "{bad:?}: {err}");
    }
  }

  #[test]
  fn executable_comes_from_the_input_stem() {
    let (object, executable) =
      toolchain_paths(Path::new("dir/prog.hy"), Path::new("out/prog.asm")).unwrap();
    assert_eq!(object, PathBuf::from("out/prog.o"));
    assert_eq!(executable, PathBuf::from("dir/prog"));
  }

  #[test]
  fn toolchain_outputs_never_overwrite_inputs() {
    for (input, asm) in [
      // -o without an extension names the executable's own path
      ("prog.hy", "prog"),
      // input without an extension would be replaced by the executable
      ("prog", "prog.asm"),
      // -o ending in .o would be replaced by the object file
      ("prog.hy", "build.o"),
    ] {
      let err = toolchain_paths(Path::new(input), Path::new(asm)).unwrap_err();
      assert!(matches!(err, DriverError::Usage { .. }), "{input} {asm}: {err}");
    }
  }
}
