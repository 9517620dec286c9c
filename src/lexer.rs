//! Lexer: turns an immutable source text into a finite vector of [`Token`]s
//! terminated by a [`TokenKind::Tok_Eof`] token.
//!
//! Built on `logos`, mirroring the teacher crate's own syntax lexer
//! (`hebi_syntax::lexer`): a derived [`logos::Logos`] enum for the token
//! kinds, run eagerly over the whole input to produce a flat `Vec<Token>`
//! rather than a pull-based stream.

#![allow(non_camel_case_types)]

use std::fmt;

use beef::lean::Cow;
use logos::Logos;
use span::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token<'src> {
  pub kind: TokenKind,
  pub lexeme: Cow<'src, str>,
  pub span: Span,
  /// 1-based source line of the first byte of this token.
  pub line: usize,
}

impl<'src> Token<'src> {
  pub fn is(&self, kind: TokenKind) -> bool {
    self.kind == kind
  }
}

impl<'src> fmt::Display for Token<'src> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.lexeme)
  }
}

#[derive(Clone, Copy, Debug, Logos, PartialEq, Eq, Hash)]
pub enum TokenKind {
  // Keywords
  #[token("local")]
  Kw_Local,
  #[token("if")]
  Kw_If,
  #[token("then")]
  Kw_Then,
  #[token("else")]
  Kw_Else,
  #[token("elseif")]
  Kw_Elseif,
  #[token("end")]
  Kw_End,
  #[token("while")]
  Kw_While,
  #[token("do")]
  Kw_Do,
  #[token("for")]
  Kw_For,
  #[token("in")]
  Kw_In,
  #[token("function")]
  Kw_Function,
  #[token("return")]
  Kw_Return,
  #[token("and")]
  Kw_And,
  #[token("or")]
  Kw_Or,
  #[token("not")]
  Kw_Not,
  #[token("nil")]
  Kw_Nil,
  #[token("true")]
  Kw_True,
  #[token("false")]
  Kw_False,
  #[token("goto")]
  Kw_Goto,
  #[token("break")]
  Kw_Break,

  // Brackets
  #[token("(")]
  Brk_ParenL,
  #[token(")")]
  Brk_ParenR,
  #[token("{")]
  Brk_CurlyL,
  #[token("}")]
  Brk_CurlyR,
  #[token("[")]
  Brk_SquareL,
  #[token("]")]
  Brk_SquareR,

  // Punctuation
  #[token("...")]
  Op_Ellipsis,
  #[token("..")]
  Op_Concat,
  #[token(".")]
  Op_Dot,
  #[token(",")]
  Tok_Comma,
  #[token("::")]
  Tok_DColon,
  #[token(":")]
  Tok_Colon,
  #[token(";")]
  Tok_Semi,

  #[token("==")]
  Op_Eq,
  #[token("=")]
  Op_Assign,
  #[token("~=")]
  Op_Ne,
  #[token("<=")]
  Op_Le,
  #[token("<")]
  Op_Lt,
  #[token(">=")]
  Op_Ge,
  #[token(">")]
  Op_Gt,

  #[token("+")]
  Op_Plus,
  #[token("-")]
  Op_Minus,
  #[token("*")]
  Op_Star,
  #[token("//")]
  Op_DSlash,
  #[token("/")]
  Op_Slash,
  #[token("%")]
  Op_Percent,
  #[token("#")]
  Op_Hash,

  // Literals
  #[regex(r"[0-9]+(\.[0-9]+)?")]
  Lit_Number,
  #[regex(r#""[^"]*""#)]
  Lit_String,
  #[regex("[a-zA-Z_][a-zA-Z0-9_]*")]
  Lit_Ident,

  #[regex(r"[ \t\r\n]+", logos::skip)]
  #[regex(r"--[^\n]*", logos::skip)]
  _Whitespace,

  #[doc(hidden)]
  #[error]
  Tok_Error,

  #[doc(hidden)]
  Tok_Eof,
}

impl TokenKind {
  /// Human-readable name used in error messages (`expected \`{}\``).
  pub fn name(&self) -> &'static str {
    use TokenKind::*;
    match self {
      Kw_Local => "local",
      Kw_If => "if",
      Kw_Then => "then",
      Kw_Else => "else",
      Kw_Elseif => "elseif",
      Kw_End => "end",
      Kw_While => "while",
      Kw_Do => "do",
      Kw_For => "for",
      Kw_In => "in",
      Kw_Function => "function",
      Kw_Return => "return",
      Kw_And => "and",
      Kw_Or => "or",
      Kw_Not => "not",
      Kw_Nil => "nil",
      Kw_True => "true",
      Kw_False => "false",
      Kw_Goto => "goto",
      Kw_Break => "break",
      Brk_ParenL => "(",
      Brk_ParenR => ")",
      Brk_CurlyL => "{",
      Brk_CurlyR => "}",
      Brk_SquareL => "[",
      Brk_SquareR => "]",
      Op_Ellipsis => "...",
      Op_Concat => "..",
      Op_Dot => ".",
      Tok_Comma => ",",
      Tok_DColon => "::",
      Tok_Colon => ":",
      Tok_Semi => ";",
      Op_Eq => "==",
      Op_Assign => "=",
      Op_Ne => "~=",
      Op_Le => "<=",
      Op_Lt => "<",
      Op_Ge => ">=",
      Op_Gt => ">",
      Op_Plus => "+",
      Op_Minus => "-",
      Op_Star => "*",
      Op_DSlash => "//",
      Op_Slash => "/",
      Op_Percent => "%",
      Op_Hash => "#",
      Lit_Number => "number",
      Lit_String => "string",
      Lit_Ident => "identifier",
      _Whitespace => "whitespace",
      Tok_Error => "unknown token",
      Tok_Eof => "<eof>",
    }
  }
}

/// Lexes `src` into a flat vector of tokens, terminated by `Tok_Eof`.
///
/// Matches no rule → [`TokenKind::Tok_Error`]; this is not itself a lex
/// failure, it is surfaced as a parse error only once the compiler
/// actually consumes it (§4.1).
pub fn lex(src: &str) -> Vec<Token<'_>> {
  // Precompute newline byte offsets once so each token's line number is a
  // binary search rather than a full rescan of the preceding source.
  let newlines: Vec<usize> = src
    .bytes()
    .enumerate()
    .filter(|(_, b)| *b == b'\n')
    .map(|(i, _)| i)
    .collect();
  let line_of = |offset: usize| -> usize { 1 + newlines.partition_point(|&nl| nl < offset) };

  let mut out = Vec::new();
  let mut lexer = logos::Lexer::<TokenKind>::new(src);
  while let Some(kind) = lexer.next() {
    let span: Span = lexer.span().into();
    out.push(Token {
      kind,
      lexeme: lexer.slice().into(),
      line: line_of(span.start),
      span,
    });
  }
  let eof: Span = (src.len()..src.len()).into();
  out.push(Token {
    kind: TokenKind::Tok_Eof,
    lexeme: "".into(),
    line: line_of(eof.start),
    span: eof,
  });
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use TokenKind::*;

  fn kinds(src: &str) -> Vec<TokenKind> {
    lex(src).into_iter().map(|t| t.kind).collect()
  }

  #[test]
  fn lexes_keywords_and_punctuation() {
    assert_eq!(
      kinds("local x = 1 + 2 return x"),
      vec![
        Kw_Local, Lit_Ident, Op_Assign, Lit_Number, Op_Plus, Lit_Number, Kw_Return, Lit_Ident,
        Tok_Eof
      ]
    );
  }

  #[test]
  fn distinguishes_dot_family() {
    assert_eq!(kinds("a.b"), vec![Lit_Ident, Op_Dot, Lit_Ident, Tok_Eof]);
    assert_eq!(kinds("a..b"), vec![Lit_Ident, Op_Concat, Lit_Ident, Tok_Eof]);
    assert_eq!(kinds("..."), vec![Op_Ellipsis, Tok_Eof]);
  }

  #[test]
  fn tracks_line_numbers_across_newlines() {
    let tokens = lex("local a = 1\nlocal b = 2");
    let lines: Vec<usize> = tokens.iter().map(|t| t.line).collect();
    assert_eq!(lines, vec![1, 1, 1, 1, 2, 2, 2, 2, 2]);
  }

  #[test]
  fn line_comment_is_skipped_and_does_not_eat_newline() {
    let tokens = lex("local a = 1 -- comment\nlocal b = 2");
    assert_eq!(tokens[4].line, 2);
  }

  #[test]
  fn unknown_character_becomes_error_token() {
    assert_eq!(kinds("a $ b"), vec![Lit_Ident, Tok_Error, Lit_Ident, Tok_Eof]);
  }
}
