//! Single-pass recursive-descent compiler (§4.2).
//!
//! There is no AST: each parsing function lowers directly into
//! [`Instruction`]s and returns the register holding its result. Nested
//! function bodies push a fresh [`CompilerState`] onto `states`; the
//! enclosing states remain reachable by index for upvalue resolution,
//! which is the "non-owning back-link" the design notes call for,
//! modelled as a stack rather than an owning parent pointer.

mod error;
mod expr;
mod regalloc;
mod stmt;

pub use error::{CompileError, ErrorKind};

use indexmap::IndexMap;
use span::Span;

use crate::bytecode::{Instruction, OpCode, Prototype, UpvalueInfo};
use crate::lexer::{Token, TokenKind};
use crate::value::Value;
use regalloc::RegAlloc;

#[derive(Clone)]
struct PendingGoto {
  name: String,
  at: usize,
  span: Span,
}

struct CompilerState {
  proto: Prototype,
  locals: IndexMap<String, u8>,
  labels: IndexMap<String, usize>,
  pending_gotos: Vec<PendingGoto>,
  regs: RegAlloc,
  break_jumps: Vec<Vec<usize>>,
  is_vararg: bool,
}

impl CompilerState {
  fn new(is_vararg: bool) -> Self {
    CompilerState {
      proto: Prototype::new(),
      locals: IndexMap::new(),
      labels: IndexMap::new(),
      pending_gotos: Vec::new(),
      regs: RegAlloc::new(),
      break_jumps: Vec::new(),
      is_vararg,
    }
  }
}

pub struct Compiler<'src> {
  tokens: Vec<Token<'src>>,
  pos: usize,
  states: Vec<CompilerState>,
}

/// Compiles a fully lexed token stream (including the trailing EOF token)
/// into a root [`Prototype`].
pub fn compile<'src>(tokens: Vec<Token<'src>>) -> Result<Prototype, CompileError> {
  let mut c = Compiler { tokens, pos: 0, states: Vec::new() };
  c.states.push(CompilerState::new(true));
  c.block(&[TokenKind::Tok_Eof])?;
  c.expect(TokenKind::Tok_Eof)?;
  c.finish_function()
}

impl<'src> Compiler<'src> {
  // ---- token cursor -------------------------------------------------

  fn peek(&self) -> &Token<'src> {
    &self.tokens[self.pos]
  }

  fn peek_kind(&self) -> TokenKind {
    self.tokens[self.pos].kind
  }

  fn check(&self, kind: TokenKind) -> bool {
    self.peek_kind() == kind
  }

  fn check_any(&self, kinds: &[TokenKind]) -> bool {
    kinds.contains(&self.peek_kind())
  }

  fn advance(&mut self) -> Token<'src> {
    let tok = self.tokens[self.pos].clone();
    if self.pos + 1 < self.tokens.len() {
      self.pos += 1;
    }
    tok
  }

  fn matches(&mut self, kind: TokenKind) -> bool {
    if self.check(kind) {
      self.advance();
      true
    } else {
      false
    }
  }

  fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, CompileError> {
    if self.check(kind) {
      Ok(self.advance())
    } else {
      let tok = self.peek().clone();
      Err(CompileError::parse(
        format!("expected `{}`, found `{}`", kind.name(), tok.lexeme),
        tok.span,
      ))
    }
  }

  fn expect_ident(&mut self) -> Result<Token<'src>, CompileError> {
    self.expect(TokenKind::Lit_Ident)
  }

  // ---- state access --------------------------------------------------

  fn state(&self) -> &CompilerState {
    self.states.last().unwrap()
  }

  fn state_mut(&mut self) -> &mut CompilerState {
    self.states.last_mut().unwrap()
  }

  fn here(&self) -> usize {
    self.state().proto.instructions.len()
  }

  fn emit(&mut self, op: OpCode, a: i32, b: i32, c: i32) -> usize {
    self.state_mut().proto.instructions.push(Instruction::new(op, a, b, c));
    self.here() - 1
  }

  fn patch_jump(&mut self, at: usize, target: usize) {
    let inst = &mut self.state_mut().proto.instructions[at];
    inst.b = target as i32 - at as i32 - 1;
  }

  fn constant(&mut self, value: Value) -> i32 {
    let proto = &mut self.state_mut().proto;
    if let Some(i) = proto.constants.iter().position(|v| *v == value) {
      return i as i32;
    }
    proto.constants.push(value);
    (proto.constants.len() - 1) as i32
  }

  fn alloc(&mut self, span: Span) -> Result<u8, CompileError> {
    self
      .state_mut()
      .regs
      .alloc()
      .map_err(|e| CompileError::semantic(e.to_string(), span))
  }

  fn alloc_contiguous(&mut self, count: usize, span: Span) -> Result<u8, CompileError> {
    self
      .state_mut()
      .regs
      .alloc_contiguous(count)
      .map_err(|e| CompileError::semantic(e.to_string(), span))
  }

  // ---- variable resolution --------------------------------------------

  /// Resolves `name` as seen from `state_idx`: local → upvalue (recursing
  /// into enclosing states) → `None` (caller treats as global), per
  /// §4.2.3's `resolveUpvalue`.
  fn resolve_upvalue(&mut self, state_idx: usize, name: &str) -> Option<usize> {
    if state_idx == 0 {
      return None;
    }
    let enclosing = state_idx - 1;
    if let Some(&reg) = self.states[enclosing].locals.get(name) {
      return Some(self.add_upvalue(state_idx, reg as usize, true));
    }
    if let Some(idx) = self.resolve_upvalue(enclosing, name) {
      return Some(self.add_upvalue(state_idx, idx, false));
    }
    None
  }

  fn add_upvalue(&mut self, state_idx: usize, index: usize, is_local: bool) -> usize {
    let proto = &mut self.states[state_idx].proto;
    if let Some(pos) = proto.upvalues.iter().position(|u| u.is_local == is_local && u.index == index) {
      return pos;
    }
    proto.upvalues.push(UpvalueInfo { is_local, index });
    proto.upvalues.len() - 1
  }

  // ---- goto / label ----------------------------------------------------

  fn resolve_gotos(&mut self) -> Result<(), CompileError> {
    let pending = std::mem::take(&mut self.state_mut().pending_gotos);
    for pg in pending {
      let target = *self
        .state()
        .labels
        .get(&pg.name)
        .ok_or_else(|| CompileError::semantic(format!("no visible label '{}' for goto", pg.name), pg.span))?;
      self.patch_jump(pg.at, target);
    }
    Ok(())
  }

  // ---- function bodies -------------------------------------------------

  /// Finalizes the top-of-stack function: appends the implicit trailing
  /// `RETURN 0, 1, 0`, resolves pending gotos, validates invariants, and
  /// pops the state off the stack.
  fn finish_function(&mut self) -> Result<Prototype, CompileError> {
    self.emit(OpCode::Return, 0, 1, 0);
    self.resolve_gotos()?;
    let state = self.states.pop().unwrap();
    state
      .proto
      .check_invariants()
      .map_err(|msg| CompileError::semantic(msg, Span::from(0..0)))?;
    Ok(state.proto)
  }

  /// Compiles `function(params[, ...]) body end`-shaped bodies (used by
  /// both statement-level and expression-level function definitions).
  /// Returns the child's index within the parent's `protos` table.
  fn compile_function_body(&mut self, params: &[String], is_vararg: bool) -> Result<usize, CompileError> {
    self.states.push(CompilerState::new(is_vararg));
    for p in params {
      let reg = self.alloc(Span::from(0..0))?;
      self.state_mut().locals.insert(p.clone(), reg);
    }
    self.state_mut().proto.num_params = params.len();
    self.block(&[TokenKind::Kw_End])?;
    self.expect(TokenKind::Kw_End)?;
    let child = self.finish_function()?;
    let parent = self.state_mut();
    parent.proto.protos.push(child);
    Ok(parent.proto.protos.len() - 1)
  }
}
