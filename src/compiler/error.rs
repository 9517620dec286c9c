use beef::lean::Cow;
use span::Span;

/// Which phase raised a [`CompileError`] (§4.2.5 / §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
  Lex,
  Parse,
  Semantic,
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      ErrorKind::Lex => "lex error",
      ErrorKind::Parse => "parse error",
      ErrorKind::Semantic => "semantic error",
    };
    write!(f, "{s}")
  }
}

/// A fatal error produced while lexing, parsing or checking the source.
/// Carries a [`Span`] rather than a bare line number so the diagnostic
/// renderer can underline the offending token in context.
#[derive(Clone, Debug)]
pub struct CompileError {
  pub kind: ErrorKind,
  pub message: Cow<'static, str>,
  pub span: Span,
}

impl CompileError {
  pub fn lex(message: impl Into<Cow<'static, str>>, span: impl Into<Span>) -> Self {
    CompileError { kind: ErrorKind::Lex, message: message.into(), span: span.into() }
  }

  pub fn parse(message: impl Into<Cow<'static, str>>, span: impl Into<Span>) -> Self {
    CompileError { kind: ErrorKind::Parse, message: message.into(), span: span.into() }
  }

  pub fn semantic(message: impl Into<Cow<'static, str>>, span: impl Into<Span>) -> Self {
    CompileError { kind: ErrorKind::Semantic, message: message.into(), span: span.into() }
  }

  pub fn report<'a>(&self, source: impl Into<diag::Source<'a>>) -> String {
    diag::Report::error()
      .source(source)
      .message(format!("{self}"))
      .span(self.span)
      .build()
      .emit_to_string()
      .unwrap()
  }
}

impl std::error::Error for CompileError {}

impl std::fmt::Display for CompileError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.message)
  }
}
