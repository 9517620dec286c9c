//! The crate's public error type (§4.2.5 / §7).

use thiserror::Error;

use crate::compiler::CompileError;

/// Anything that can go wrong compiling or emitting a program.
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Compile(#[from] CompileError),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl Error {
  /// Renders a human-readable, source-annotated report for this error.
  /// Falls back to `Display` for errors that carry no source span.
  pub fn report<'a>(&self, source: impl Into<diag::Source<'a>>) -> String {
    match self {
      Error::Compile(e) => e.report(source),
      Error::Io(e) => format!("error: {e}"),
    }
  }
}
