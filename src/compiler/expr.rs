//! Expression lowering (§4.2's expression grammar and lowering contracts).
//!
//! Every parsing function here returns the register holding its result;
//! there is no intermediate AST node. Precedence climbs
//! `expr → logic → compare → concat → term → factor → unary → atom`.

use span::Span;

use super::{CompileError, Compiler};
use crate::bytecode::OpCode;
use crate::lexer::TokenKind;
use crate::value::Value;

/// The result of parsing an identifier followed by zero or more suffixes.
/// Shared between expression parsing (which only ever wants the value)
/// and statement parsing (which needs to know whether it ended on an
/// assignable place or a call, to build assignments and call-statements).
pub(super) enum Suffixed {
  Name(String, Span),
  Field(u8, u8, Span),
  Call(u8, usize),
}

const SUFFIX_STARTS: [TokenKind; 4] =
  [TokenKind::Op_Dot, TokenKind::Brk_SquareL, TokenKind::Brk_ParenL, TokenKind::Tok_Colon];

impl<'src> Compiler<'src> {
  pub(super) fn expr(&mut self) -> Result<u8, CompileError> {
    self.logic()
  }

  fn logic(&mut self) -> Result<u8, CompileError> {
    let mut lhs = self.compare()?;
    while self.check_any(&[TokenKind::Kw_And, TokenKind::Kw_Or]) {
      let is_and = self.check(TokenKind::Kw_And);
      let span = self.advance().span;
      lhs = self.short_circuit(lhs, is_and, span)?;
    }
    Ok(lhs)
  }

  /// `a and b`: `MOVE r←a; JMP_FALSE r,L; b into r'; MOVE r←r'; L:`.
  /// `a or b` additionally negates the test. Both preserve the operand
  /// value (not a coerced boolean) because `r` keeps holding `a` when the
  /// jump is taken.
  fn short_circuit(&mut self, lhs: u8, is_and: bool, span: Span) -> Result<u8, CompileError> {
    let r = self.alloc(span)?;
    self.emit(OpCode::Move, r as i32, lhs as i32, 0);
    let jmp_at = if is_and {
      self.emit(OpCode::JmpFalse, r as i32, 0, 0)
    } else {
      let tmp = self.alloc(span)?;
      self.emit(OpCode::Not, tmp as i32, r as i32, 0);
      self.emit(OpCode::JmpFalse, tmp as i32, 0, 0)
    };
    let rhs = self.compare()?;
    self.emit(OpCode::Move, r as i32, rhs as i32, 0);
    let here = self.here();
    self.patch_jump(jmp_at, here);
    Ok(r)
  }

  fn compare(&mut self) -> Result<u8, CompileError> {
    let mut lhs = self.concat()?;
    loop {
      let (op, swap, negate) = match self.peek_kind() {
        TokenKind::Op_Eq => (OpCode::Eq, false, false),
        TokenKind::Op_Ne => (OpCode::Eq, false, true),
        TokenKind::Op_Lt => (OpCode::Lt, false, false),
        TokenKind::Op_Le => (OpCode::Le, false, false),
        TokenKind::Op_Gt => (OpCode::Lt, true, false),
        TokenKind::Op_Ge => (OpCode::Le, true, false),
        _ => break,
      };
      let span = self.advance().span;
      let rhs = self.concat()?;
      let (a, b) = if swap { (rhs, lhs) } else { (lhs, rhs) };
      let dst = self.alloc(span)?;
      self.emit(op, dst as i32, a as i32, b as i32);
      lhs = if negate {
        let dst2 = self.alloc(span)?;
        self.emit(OpCode::Not, dst2 as i32, dst as i32, 0);
        dst2
      } else {
        dst
      };
    }
    Ok(lhs)
  }

  /// Right-associative: `concat → term ('..' concat)?`.
  fn concat(&mut self) -> Result<u8, CompileError> {
    let lhs = self.term()?;
    if self.check(TokenKind::Op_Concat) {
      let span = self.advance().span;
      let rhs = self.concat()?;
      let dst = self.alloc(span)?;
      self.emit(OpCode::Concat, dst as i32, lhs as i32, rhs as i32);
      return Ok(dst);
    }
    Ok(lhs)
  }

  fn term(&mut self) -> Result<u8, CompileError> {
    let mut lhs = self.factor()?;
    loop {
      let op = match self.peek_kind() {
        TokenKind::Op_Plus => OpCode::Add,
        TokenKind::Op_Minus => OpCode::Sub,
        _ => break,
      };
      let span = self.advance().span;
      let rhs = self.factor()?;
      let dst = self.alloc(span)?;
      self.emit(op, dst as i32, lhs as i32, rhs as i32);
      lhs = dst;
    }
    Ok(lhs)
  }

  fn factor(&mut self) -> Result<u8, CompileError> {
    let mut lhs = self.unary()?;
    loop {
      let op = match self.peek_kind() {
        TokenKind::Op_Star => OpCode::Mul,
        TokenKind::Op_Slash => OpCode::Div,
        TokenKind::Op_DSlash => OpCode::IDiv,
        TokenKind::Op_Percent => OpCode::Mod,
        _ => break,
      };
      let span = self.advance().span;
      let rhs = self.unary()?;
      let dst = self.alloc(span)?;
      self.emit(op, dst as i32, lhs as i32, rhs as i32);
      lhs = dst;
    }
    Ok(lhs)
  }

  /// Unary minus lowers as `0 - x`: a LOADK of the zero constant, then SUB.
  fn unary(&mut self) -> Result<u8, CompileError> {
    match self.peek_kind() {
      TokenKind::Kw_Not => {
        let span = self.advance().span;
        let v = self.unary()?;
        let dst = self.alloc(span)?;
        self.emit(OpCode::Not, dst as i32, v as i32, 0);
        Ok(dst)
      }
      TokenKind::Op_Hash => {
        let span = self.advance().span;
        let v = self.unary()?;
        let dst = self.alloc(span)?;
        self.emit(OpCode::Len, dst as i32, v as i32, 0);
        Ok(dst)
      }
      TokenKind::Op_Minus => {
        let span = self.advance().span;
        let v = self.unary()?;
        let k = self.constant(Value::Number(0.0));
        let zero = self.alloc(span)?;
        self.emit(OpCode::LoadK, zero as i32, k, 0);
        let dst = self.alloc(span)?;
        self.emit(OpCode::Sub, dst as i32, zero as i32, v as i32);
        Ok(dst)
      }
      _ => self.atom(),
    }
  }

  fn atom(&mut self) -> Result<u8, CompileError> {
    match self.peek_kind() {
      TokenKind::Lit_Number => {
        let tok = self.advance();
        let n: f64 = tok
          .lexeme
          .parse()
          .map_err(|_| CompileError::lex(format!("malformed number '{}'", tok.lexeme), tok.span))?;
        let k = self.constant(Value::Number(n));
        let dst = self.alloc(tok.span)?;
        self.emit(OpCode::LoadK, dst as i32, k, 0);
        Ok(dst)
      }
      TokenKind::Lit_String => {
        let tok = self.advance();
        let s = tok.lexeme.trim_matches('"').to_string();
        let k = self.constant(Value::string(s));
        let dst = self.alloc(tok.span)?;
        self.emit(OpCode::LoadK, dst as i32, k, 0);
        Ok(dst)
      }
      TokenKind::Kw_Nil => {
        let tok = self.advance();
        let k = self.constant(Value::Nil);
        let dst = self.alloc(tok.span)?;
        self.emit(OpCode::LoadK, dst as i32, k, 0);
        Ok(dst)
      }
      TokenKind::Kw_True | TokenKind::Kw_False => {
        let tok = self.advance();
        let k = self.constant(Value::Bool(tok.kind == TokenKind::Kw_True));
        let dst = self.alloc(tok.span)?;
        self.emit(OpCode::LoadK, dst as i32, k, 0);
        Ok(dst)
      }
      TokenKind::Op_Ellipsis => {
        let tok = self.advance();
        if !self.state().is_vararg {
          return Err(CompileError::semantic("'...' used outside a vararg function", tok.span));
        }
        let dst = self.alloc(tok.span)?;
        self.emit(OpCode::Vararg, dst as i32, 2, 0);
        Ok(dst)
      }
      TokenKind::Brk_CurlyL => self.table_ctor(),
      TokenKind::Brk_ParenL => {
        self.advance();
        let r = self.expr()?;
        self.expect(TokenKind::Brk_ParenR)?;
        Ok(r)
      }
      TokenKind::Kw_Function => {
        self.advance();
        self.function_expr()
      }
      TokenKind::Lit_Ident => self.prefix_expr(),
      _ => {
        let tok = self.peek().clone();
        Err(CompileError::parse(format!("unexpected token '{}'", tok.lexeme), tok.span))
      }
    }
  }

  /// `NEWTABLE dst` then, for each field, `SETTABLE dst, key, value`.
  /// Array entries take successive integer keys starting at 1. The
  /// allocator is snapshotted before the first entry and restored before
  /// each subsequent one so entries share scratch registers.
  fn table_ctor(&mut self) -> Result<u8, CompileError> {
    let open = self.expect(TokenKind::Brk_CurlyL)?;
    let dst = self.alloc(open.span)?;
    self.emit(OpCode::NewTable, dst as i32, 0, 0);
    let snap = self.state().regs.snapshot();
    let mut next_index: f64 = 1.0;
    let mut first = true;
    while !self.check(TokenKind::Brk_CurlyR) {
      if !first {
        self.state_mut().regs.restore(snap);
      }
      first = false;

      let (key_reg, val_reg) = if self.check(TokenKind::Brk_SquareL) {
        self.advance();
        let k = self.expr()?;
        self.expect(TokenKind::Brk_SquareR)?;
        self.expect(TokenKind::Op_Assign)?;
        let v = self.expr()?;
        (k, v)
      } else if self.check(TokenKind::Lit_Ident) && self.tokens[self.pos + 1].kind == TokenKind::Op_Assign {
        let name = self.advance();
        self.advance(); // '='
        let kidx = self.constant(Value::string(name.lexeme.to_string()));
        let kreg = self.alloc(name.span)?;
        self.emit(OpCode::LoadK, kreg as i32, kidx, 0);
        let v = self.expr()?;
        (kreg, v)
      } else {
        let span = self.peek().span;
        let kidx = self.constant(Value::Number(next_index));
        next_index += 1.0;
        let kreg = self.alloc(span)?;
        self.emit(OpCode::LoadK, kreg as i32, kidx, 0);
        let v = self.expr()?;
        (kreg, v)
      };
      self.emit(OpCode::SetTable, dst as i32, key_reg as i32, val_reg as i32);

      if self.check(TokenKind::Brk_CurlyR) {
        break;
      }
      if !self.matches(TokenKind::Tok_Comma) && !self.matches(TokenKind::Tok_Semi) {
        let tok = self.peek().clone();
        return Err(CompileError::parse(
          format!("expected ',' or '}}' in table constructor, found '{}'", tok.lexeme),
          tok.span,
        ));
      }
    }
    self.expect(TokenKind::Brk_CurlyR)?;
    self.state_mut().regs.restore(snap);
    Ok(dst)
  }

  pub(super) fn function_expr(&mut self) -> Result<u8, CompileError> {
    let span = self.peek().span;
    let (params, is_vararg) = self.parse_param_list()?;
    let proto_idx = self.compile_function_body(&params, is_vararg)?;
    let dst = self.alloc(span)?;
    self.emit(OpCode::Closure, dst as i32, proto_idx as i32, 0);
    Ok(dst)
  }

  pub(super) fn parse_param_list(&mut self) -> Result<(Vec<String>, bool), CompileError> {
    self.expect(TokenKind::Brk_ParenL)?;
    let mut params = Vec::new();
    let mut is_vararg = false;
    if !self.check(TokenKind::Brk_ParenR) {
      loop {
        if self.check(TokenKind::Op_Ellipsis) {
          self.advance();
          is_vararg = true;
          break;
        }
        let name = self.expect_ident()?;
        params.push(name.lexeme.to_string());
        if !self.matches(TokenKind::Tok_Comma) {
          break;
        }
      }
    }
    self.expect(TokenKind::Brk_ParenR)?;
    Ok((params, is_vararg))
  }

  fn prefix_expr(&mut self) -> Result<u8, CompileError> {
    match self.parse_suffixed()? {
      Suffixed::Name(name, span) => self.read_var(&name, span),
      Suffixed::Field(t, k, span) => {
        let dst = self.alloc(span)?;
        self.emit(OpCode::GetTable, dst as i32, t as i32, k as i32);
        Ok(dst)
      }
      Suffixed::Call(r, _) => Ok(r),
    }
  }

  /// Reads a variable, resolving local → upvalue → global (§4.2's
  /// variable read resolution order). Locals are returned by register
  /// directly with no copy.
  pub(super) fn read_var(&mut self, name: &str, span: Span) -> Result<u8, CompileError> {
    let idx = self.states.len() - 1;
    if let Some(&reg) = self.states[idx].locals.get(name) {
      return Ok(reg);
    }
    if let Some(up) = self.resolve_upvalue(idx, name) {
      let dst = self.alloc(span)?;
      self.emit(OpCode::GetUpval, dst as i32, up as i32, 0);
      return Ok(dst);
    }
    let kidx = self.constant(Value::string(name.to_string()));
    let dst = self.alloc(span)?;
    self.emit(OpCode::GetGlobal, dst as i32, kidx, 0);
    Ok(dst)
  }

  /// Parses `IDENT` followed by zero or more suffixes, emitting GETTABLE
  /// for every suffix except a trailing `.field`/`[expr]` (returned
  /// unresolved as [`Suffixed::Field`] so assignment can SETTABLE it
  /// instead) and returning [`Suffixed::Call`] when the chain ends on a
  /// call, so statement parsing can rewrite its result count.
  pub(super) fn parse_suffixed(&mut self) -> Result<Suffixed, CompileError> {
    let name_tok = self.expect_ident()?;
    if !self.check_any(&SUFFIX_STARTS) {
      return Ok(Suffixed::Name(name_tok.lexeme.to_string(), name_tok.span));
    }
    let mut reg = self.read_var(&name_tok.lexeme, name_tok.span)?;
    loop {
      match self.peek_kind() {
        TokenKind::Op_Dot => {
          self.advance();
          let field = self.expect_ident()?;
          let kidx = self.constant(Value::string(field.lexeme.to_string()));
          let kreg = self.alloc(field.span)?;
          self.emit(OpCode::LoadK, kreg as i32, kidx, 0);
          if !self.check_any(&SUFFIX_STARTS) {
            return Ok(Suffixed::Field(reg, kreg, field.span));
          }
          let dst = self.alloc(field.span)?;
          self.emit(OpCode::GetTable, dst as i32, reg as i32, kreg as i32);
          reg = dst;
        }
        TokenKind::Brk_SquareL => {
          self.advance();
          let idx = self.expr()?;
          let close = self.expect(TokenKind::Brk_SquareR)?;
          if !self.check_any(&SUFFIX_STARTS) {
            return Ok(Suffixed::Field(reg, idx, close.span));
          }
          let dst = self.alloc(close.span)?;
          self.emit(OpCode::GetTable, dst as i32, reg as i32, idx as i32);
          reg = dst;
        }
        TokenKind::Brk_ParenL => {
          let (r, call_at) = self.call_suffix(reg, None)?;
          if !self.check_any(&SUFFIX_STARTS) {
            return Ok(Suffixed::Call(r, call_at));
          }
          reg = r;
        }
        TokenKind::Tok_Colon => {
          self.advance();
          let method = self.expect_ident()?;
          let (r, call_at) = self.call_suffix(reg, Some(method.lexeme.to_string()))?;
          if !self.check_any(&SUFFIX_STARTS) {
            return Ok(Suffixed::Call(r, call_at));
          }
          reg = r;
        }
        _ => unreachable!("loop only continues while a suffix token is next"),
      }
    }
  }

  /// Lowers `callee(args…)` / `callee:method(args…)`. Arguments are
  /// evaluated to scratch registers first, then a contiguous block is
  /// allocated and the callee plus every argument is MOVEd into it,
  /// per §4.2's call lowering contract. Returns the result base register
  /// and the index of the CALL instruction, so callers can rewrite its
  /// `C` operand (statement calls discard results; multi-value
  /// adjustment requests more of them).
  pub(super) fn call_suffix(&mut self, callee: u8, method: Option<String>) -> Result<(u8, usize), CompileError> {
    let open = self.expect(TokenKind::Brk_ParenL)?;
    let mut fn_reg = callee;
    let mut implicit_self = false;
    if let Some(name) = &method {
      let kidx = self.constant(Value::string(name.clone()));
      let kreg = self.alloc(open.span)?;
      self.emit(OpCode::LoadK, kreg as i32, kidx, 0);
      let mreg = self.alloc(open.span)?;
      self.emit(OpCode::GetTable, mreg as i32, callee as i32, kreg as i32);
      fn_reg = mreg;
      implicit_self = true;
    }

    let mut args: Vec<u8> = Vec::new();
    if implicit_self {
      args.push(callee);
    }
    if !self.check(TokenKind::Brk_ParenR) {
      loop {
        args.push(self.expr()?);
        if !self.matches(TokenKind::Tok_Comma) {
          break;
        }
      }
    }
    let close = self.expect(TokenKind::Brk_ParenR)?;

    let base = self.alloc_contiguous(1 + args.len(), close.span)?;
    self.emit(OpCode::Move, base as i32, fn_reg as i32, 0);
    for (i, a) in args.iter().enumerate() {
      self.emit(OpCode::Move, base as i32 + 1 + i as i32, *a as i32, 0);
    }
    let call_at = self.emit(OpCode::Call, base as i32, (args.len() + 1) as i32, 2);
    Ok((base, call_at))
  }

  /// Evaluates a comma-separated expression list, returning one register
  /// per value. If fewer expressions than `names_needed` were given and
  /// the sole RHS expression was a trailing call, that call's `C`
  /// operand is rewritten to produce the extra results (§4.2's
  /// "Multi-value ADJUSTMENT"), and the registers it writes into
  /// (`base..base+names_needed`) are returned instead.
  pub(super) fn eval_rhs_list(&mut self, names_needed: usize) -> Result<Vec<u8>, CompileError> {
    let mut regs = Vec::new();
    let mut trailing_call = None;
    loop {
      let before = self.here();
      let r = self.expr()?;
      trailing_call = None;
      if self.here() > before {
        let last = self.state().proto.instructions[self.here() - 1];
        if last.op == OpCode::Call && last.a == r as i32 {
          trailing_call = Some(self.here() - 1);
        }
      }
      regs.push(r);
      if !self.matches(TokenKind::Tok_Comma) {
        break;
      }
    }
    if regs.len() == 1 && names_needed > regs.len() {
      if let Some(call_at) = trailing_call {
        let base = self.state().proto.instructions[call_at].a as u8;
        self.state_mut().proto.instructions[call_at].c = (names_needed + 1) as i32;
        regs.clear();
        for i in 0..names_needed {
          let reg = base + i as u8;
          self.state_mut().regs.mark_used(reg);
          regs.push(reg);
        }
      }
    }
    Ok(regs)
  }

  /// Stores `src` into an assignment target resolved by [`Self::parse_suffixed`].
  pub(super) fn store_target(&mut self, target: Suffixed, src: u8, span: Span) -> Result<(), CompileError> {
    match target {
      Suffixed::Name(name, _) => {
        let idx = self.states.len() - 1;
        if let Some(&reg) = self.states[idx].locals.get(&name) {
          self.emit(OpCode::Move, reg as i32, src as i32, 0);
        } else if let Some(up) = self.resolve_upvalue(idx, &name) {
          self.emit(OpCode::SetUpval, src as i32, up as i32, 0);
        } else {
          let kidx = self.constant(Value::string(name));
          self.emit(OpCode::SetGlobal, src as i32, kidx, 0);
        }
        Ok(())
      }
      Suffixed::Field(t, k, _) => {
        self.emit(OpCode::SetTable, t as i32, k as i32, src as i32);
        Ok(())
      }
      Suffixed::Call(..) => Err(CompileError::parse("cannot assign to a function call result", span)),
    }
  }
}
