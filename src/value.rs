//! The constant-pool value model.
//!
//! This is deliberately tiny: the compiler never needs to *operate* on
//! values (no constant folding), it only needs to store them in a
//! [`Prototype`][crate::bytecode::Prototype]'s constant pool and later
//! render them back out as SL source text.

use beef::lean::Cow;

/// A compile-time constant. Mirrors the runtime value model described by
/// the emitted VM driver (§6.2): nil, booleans, numbers and strings, with
/// Lua-style truthiness (only `nil` and `false` are falsey).
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
  Nil,
  Bool(bool),
  Number(f64),
  String(Cow<'static, str>),
}

impl Value {
  pub fn string(s: impl Into<Cow<'static, str>>) -> Self {
    Value::String(s.into())
  }

  /// Only `nil` and `false` are falsey; every other value, including
  /// `0` and `""`, is truthy.
  pub fn is_truthy(&self) -> bool {
    !matches!(self, Value::Nil | Value::Bool(false))
  }
}

impl std::fmt::Display for Value {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::Nil => write!(f, "nil"),
      Value::Bool(b) => write!(f, "{b}"),
      Value::Number(n) => write!(f, "{n}"),
      Value::String(s) => write!(f, "{s:?}"),
    }
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Number(v)
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Bool(v)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truthiness() {
    assert!(!Value::Nil.is_truthy());
    assert!(!Value::Bool(false).is_truthy());
    assert!(Value::Bool(true).is_truthy());
    assert!(Value::Number(0.0).is_truthy());
    assert!(Value::string("").is_truthy());
  }

  #[test]
  fn display_matches_sl_literal_syntax() {
    assert_eq!(Value::Nil.to_string(), "nil");
    assert_eq!(Value::Bool(true).to_string(), "true");
    assert_eq!(Value::Number(1.5).to_string(), "1.5");
    assert_eq!(Value::string("hi").to_string(), "\"hi\"");
  }
}
