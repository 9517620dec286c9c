//! A source-to-source compiler for a small Lua-like scripting language.
//!
//! `compile` lexes and compiles a program into a register-based
//! bytecode [`Prototype`][bytecode::Prototype], then [`emit::emit`]s it
//! as a self-contained SL program: the bytecode as a nested table
//! literal plus an embedded VM driver that interprets it. There is no
//! AST — [`compiler`] lowers directly from tokens to instructions.

pub mod bytecode;
mod compiler;
mod emit;
mod error;
mod lexer;
pub mod strategy;
pub mod value;

pub use compiler::CompileError;
pub use error::Error;
pub use strategy::OpCodeStrategy;

/// Flags accepted by [`compile`], mirroring the `-vmp`/`-pack`/`-encrypt`
/// command-line flags (§6.1).
#[derive(Clone, Copy, Debug, Default)]
pub struct CompileOptions {
  /// Randomize the opcode numbering (`Randomized` strategy) instead of
  /// using the canonical one.
  pub vmp: bool,
  /// Minify the emitted source text.
  pub pack: bool,
  /// XOR-encrypt string constants and instruction tuples.
  pub encrypt: bool,
}

/// Compiles `source` into a self-contained, runnable SL program per
/// `options`.
pub fn compile(source: &str, options: CompileOptions) -> Result<String, Error> {
  let tokens = lexer::lex(source);
  let proto = compiler::compile(tokens)?;

  let strategy: Box<dyn OpCodeStrategy> =
    if options.vmp { Box::new(strategy::Randomized::new()) } else { Box::new(strategy::Identity) };

  let emit_options = emit::EmitOptions { pack: options.pack, encrypt: options.encrypt };
  Ok(emit::emit(&proto, strategy.as_ref(), emit_options))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn compiles_minimal_program_to_runnable_text() {
    let out = compile("local x = 1 + 2\nreturn x", CompileOptions::default()).unwrap();
    assert!(out.contains("local OP_ADD = 2\n"));
    assert!(out.contains("run_vm({ proto = main_proto, upvalues = {} }, {})"));
  }

  #[test]
  fn reports_parse_errors_with_a_span() {
    let err = compile("local = 1", CompileOptions::default()).unwrap_err();
    let rendered = err.report("local = 1");
    assert!(rendered.starts_with("error:"));
  }

  #[test]
  fn vmp_changes_the_opcode_numbering() {
    let plain = compile("return 1", CompileOptions::default()).unwrap();
    let vmp = compile("return 1", CompileOptions { vmp: true, ..Default::default() }).unwrap();
    let plain_bank: Vec<&str> = plain.lines().take(31).collect();
    let vmp_bank: Vec<&str> = vmp.lines().take(31).collect();
    assert_ne!(plain_bank, vmp_bank);
  }
}
