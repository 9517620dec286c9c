//! `slc <input-file> <output-file> [-vmp] [-pack] [-encrypt]` (§6.1).

use std::fs;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use slc::{compile, CompileOptions};

// The reference generator accepts its mode flags single-dash
// (`-vmp`, `-pack`, `-encrypt`, checked by a plain `strcmp` loop over
// `argv`), not clap's double-dash `long` convention, so the trailing
// flags are captured as raw strings and matched by hand the same way.
#[derive(Parser)]
#[command(name = "slc", about = "Compiles a script into a self-contained, obfuscatable program")]
struct Args {
  /// Path to the source file to compile.
  input: std::path::PathBuf,
  /// Path to write the emitted program to.
  output: std::path::PathBuf,
  /// `-vmp` randomizes opcode numbering, `-pack` minifies the emitted
  /// source text, `-encrypt` XOR-encrypts string constants and
  /// instruction tuples.
  #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
  flags: Vec<String>,
}

impl Args {
  fn has_flag(&self, name: &str) -> bool {
    self.flags.iter().any(|f| f == name)
  }
}

fn main() -> ExitCode {
  let args = Args::parse();
  match run(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(message) => {
      eprintln!("{message}");
      ExitCode::FAILURE
    }
  }
}

fn run(args: &Args) -> anyhow::Result<()> {
  let source =
    fs::read_to_string(&args.input).with_context(|| format!("failed to read {}", args.input.display()))?;

  let options = CompileOptions {
    vmp: args.has_flag("-vmp"),
    pack: args.has_flag("-pack"),
    encrypt: args.has_flag("-encrypt"),
  };
  let emitted = compile(&source, options).map_err(|e| anyhow::anyhow!(e.report(source.as_str())))?;

  fs::write(&args.output, emitted).with_context(|| format!("failed to write {}", args.output.display()))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_single_dash_flags() {
    let args = Args::parse_from(["slc", "in.sl", "out.sl", "-vmp", "-encrypt"]);
    assert!(args.has_flag("-vmp"));
    assert!(!args.has_flag("-pack"));
    assert!(args.has_flag("-encrypt"));
  }

  #[test]
  fn no_flags_leaves_everything_disabled() {
    let args = Args::parse_from(["slc", "in.sl", "out.sl"]);
    assert!(!args.has_flag("-vmp"));
    assert!(!args.has_flag("-pack"));
    assert!(!args.has_flag("-encrypt"));
  }
}
