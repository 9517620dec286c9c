//! Statement and control-flow lowering (§4.2, §4.2.1, §4.2.2).

use super::expr::Suffixed;
use super::{CompileError, Compiler, PendingGoto};
use crate::bytecode::OpCode;
use crate::lexer::{Token, TokenKind};
use crate::value::Value;

impl<'src> Compiler<'src> {
  /// Compiles statements until one of `end_kinds` (or EOF) is next,
  /// resetting the register allocator to exactly the live locals after
  /// each statement (§4.2: "the growth of allocatedRegs is bounded by
  /// the maximum simultaneously live local/scratch count within a
  /// statement").
  pub(super) fn block(&mut self, end_kinds: &[TokenKind]) -> Result<(), CompileError> {
    while !self.check_any(end_kinds) && !self.check(TokenKind::Tok_Eof) {
      self.statement()?;
      self.reset_to_locals();
    }
    Ok(())
  }

  fn reset_to_locals(&mut self) {
    let live: Vec<u8> = self.state().locals.values().copied().collect();
    self.state_mut().regs.reset_to(&live);
  }

  fn statement(&mut self) -> Result<(), CompileError> {
    match self.peek_kind() {
      TokenKind::Kw_Local => self.local_stmt(),
      TokenKind::Kw_If => self.if_stmt(),
      TokenKind::Kw_While => self.while_stmt(),
      TokenKind::Kw_For => self.for_stmt(),
      TokenKind::Kw_Function => self.function_stmt(),
      TokenKind::Kw_Return => self.return_stmt(),
      TokenKind::Kw_Break => self.break_stmt(),
      TokenKind::Kw_Goto => self.goto_stmt(),
      TokenKind::Tok_DColon => self.label_stmt(),
      TokenKind::Kw_Do => {
        self.advance();
        self.block(&[TokenKind::Kw_End])?;
        self.expect(TokenKind::Kw_End)?;
        Ok(())
      }
      TokenKind::Tok_Semi => {
        self.advance();
        Ok(())
      }
      _ => self.expr_or_assign_stmt(),
    }
  }

  fn local_stmt(&mut self) -> Result<(), CompileError> {
    self.advance(); // 'local'

    if self.check(TokenKind::Kw_Function) {
      self.advance();
      let name = self.expect_ident()?;
      // Pre-bind the local to its register before compiling the body so
      // a recursive reference resolves as an upvalue onto itself.
      let dst = self.alloc(name.span)?;
      self.state_mut().locals.insert(name.lexeme.to_string(), dst);
      let (params, is_vararg) = self.parse_param_list()?;
      let proto_idx = self.compile_function_body(&params, is_vararg)?;
      self.emit(OpCode::Closure, dst as i32, proto_idx as i32, 0);
      return Ok(());
    }

    let mut names = Vec::new();
    loop {
      names.push(self.expect_ident()?);
      if !self.matches(TokenKind::Tok_Comma) {
        break;
      }
    }
    let rhs = if self.matches(TokenKind::Op_Assign) {
      self.eval_rhs_list(names.len())?
    } else {
      Vec::new()
    };
    for (i, name) in names.iter().enumerate() {
      let reg = self.alloc(name.span)?;
      match rhs.get(i) {
        Some(&src) => {
          self.emit(OpCode::Move, reg as i32, src as i32, 0);
        }
        None => {
          let k = self.constant(Value::Nil);
          self.emit(OpCode::LoadK, reg as i32, k, 0);
        }
      }
      self.state_mut().locals.insert(name.lexeme.to_string(), reg);
    }
    Ok(())
  }

  fn expr_or_assign_stmt(&mut self) -> Result<(), CompileError> {
    let span = self.peek().span;
    let first = self.parse_suffixed()?;
    if self.check(TokenKind::Op_Assign) || self.check(TokenKind::Tok_Comma) {
      let mut targets = vec![first];
      while self.matches(TokenKind::Tok_Comma) {
        targets.push(self.parse_suffixed()?);
      }
      self.expect(TokenKind::Op_Assign)?;
      let rhs = self.eval_rhs_list(targets.len())?;
      for (i, t) in targets.into_iter().enumerate() {
        let src = match rhs.get(i) {
          Some(&r) => r,
          None => {
            let dst = self.alloc(span)?;
            let k = self.constant(Value::Nil);
            self.emit(OpCode::LoadK, dst as i32, k, 0);
            dst
          }
        };
        self.store_target(t, src, span)?;
      }
      Ok(())
    } else if let Suffixed::Call(_, call_at) = first {
      self.state_mut().proto.instructions[call_at].c = 1;
      Ok(())
    } else {
      Err(CompileError::parse("syntax error: expected a statement", span))
    }
  }

  fn if_stmt(&mut self) -> Result<(), CompileError> {
    self.advance(); // 'if'
    let mut end_jumps = Vec::new();
    let mut branch_exit = self.compile_if_branch()?;
    loop {
      match self.peek_kind() {
        TokenKind::Kw_Elseif => {
          self.advance();
          end_jumps.push(self.emit(OpCode::Jmp, 0, 0, 0));
          let here = self.here();
          self.patch_jump(branch_exit, here);
          branch_exit = self.compile_if_branch()?;
        }
        TokenKind::Kw_Else => {
          self.advance();
          end_jumps.push(self.emit(OpCode::Jmp, 0, 0, 0));
          let here = self.here();
          self.patch_jump(branch_exit, here);
          self.block(&[TokenKind::Kw_End])?;
          self.expect(TokenKind::Kw_End)?;
          let end = self.here();
          for j in end_jumps {
            self.patch_jump(j, end);
          }
          return Ok(());
        }
        _ => {
          let here = self.here();
          self.patch_jump(branch_exit, here);
          self.expect(TokenKind::Kw_End)?;
          let end = self.here();
          for j in end_jumps {
            self.patch_jump(j, end);
          }
          return Ok(());
        }
      }
    }
  }

  /// Parses one `cond then block` branch and returns the index of its
  /// `JMP_FALSE`, left unpatched for the caller to wire up.
  fn compile_if_branch(&mut self) -> Result<usize, CompileError> {
    let cond = self.expr()?;
    self.expect(TokenKind::Kw_Then)?;
    let jmp_false = self.emit(OpCode::JmpFalse, cond as i32, 0, 0);
    self.block(&[TokenKind::Kw_End, TokenKind::Kw_Else, TokenKind::Kw_Elseif])?;
    Ok(jmp_false)
  }

  fn while_stmt(&mut self) -> Result<(), CompileError> {
    self.advance(); // 'while'
    let loop_start = self.here();
    let cond = self.expr()?;
    self.expect(TokenKind::Kw_Do)?;
    let jmp_exit = self.emit(OpCode::JmpFalse, cond as i32, 0, 0);
    self.state_mut().break_jumps.push(Vec::new());
    self.block(&[TokenKind::Kw_End])?;
    self.expect(TokenKind::Kw_End)?;
    let jmp_back = self.emit(OpCode::Jmp, 0, 0, 0);
    self.patch_jump(jmp_back, loop_start);
    let loop_exit = self.here();
    self.patch_jump(jmp_exit, loop_exit);
    let breaks = self.state_mut().break_jumps.pop().unwrap();
    for b in breaks {
      self.patch_jump(b, loop_exit);
    }
    Ok(())
  }

  fn for_stmt(&mut self) -> Result<(), CompileError> {
    self.advance(); // 'for'
    let first = self.expect_ident()?;
    if self.check(TokenKind::Op_Assign) {
      self.numeric_for_stmt(first)
    } else {
      self.generic_for_stmt(first)
    }
  }

  /// `for v = start, limit[, step] do … end` (§4.2.1). The three control
  /// registers are locked for the body's duration via synthetic local
  /// entries so `reset_to_locals` never reclaims them.
  fn numeric_for_stmt(&mut self, var_name: Token<'src>) -> Result<(), CompileError> {
    self.advance(); // '='
    let start = self.expr()?;
    self.expect(TokenKind::Tok_Comma)?;
    let limit = self.expr()?;
    let step = if self.matches(TokenKind::Tok_Comma) {
      Some(self.expr()?)
    } else {
      None
    };
    self.expect(TokenKind::Kw_Do)?;

    let snap = self.state().regs.snapshot();
    let base = self.alloc_contiguous(4, var_name.span)?;
    self.emit(OpCode::Move, base as i32, start as i32, 0);
    self.emit(OpCode::Move, base as i32 + 1, limit as i32, 0);
    match step {
      Some(s) => {
        self.emit(OpCode::Move, base as i32 + 2, s as i32, 0);
      }
      None => {
        let k = self.constant(Value::Number(1.0));
        self.emit(OpCode::LoadK, base as i32 + 2, k, 0);
      }
    }

    let shadowed = self.state_mut().locals.insert(var_name.lexeme.to_string(), base + 3);
    let lock_base = format!("@for@{base}@base");
    let lock_limit = format!("@for@{base}@limit");
    let lock_step = format!("@for@{base}@step");
    self.state_mut().locals.insert(lock_base.clone(), base);
    self.state_mut().locals.insert(lock_limit.clone(), base + 1);
    self.state_mut().locals.insert(lock_step.clone(), base + 2);

    let forprep_at = self.emit(OpCode::ForPrep, base as i32, 0, 0);
    let loop_start = self.here();
    self.state_mut().break_jumps.push(Vec::new());
    self.block(&[TokenKind::Kw_End])?;
    self.expect(TokenKind::Kw_End)?;
    let forloop_at = self.emit(OpCode::ForLoop, base as i32, 0, 0);
    self.patch_jump(forprep_at, forloop_at);
    self.patch_jump(forloop_at, loop_start);
    let loop_exit = self.here();
    let breaks = self.state_mut().break_jumps.pop().unwrap();
    for b in breaks {
      self.patch_jump(b, loop_exit);
    }

    self.state_mut().locals.shift_remove(&lock_base);
    self.state_mut().locals.shift_remove(&lock_limit);
    self.state_mut().locals.shift_remove(&lock_step);
    match shadowed {
      Some(reg) => {
        self.state_mut().locals.insert(var_name.lexeme.to_string(), reg);
      }
      None => {
        self.state_mut().locals.shift_remove(&var_name.lexeme.to_string());
      }
    }
    self.state_mut().regs.restore(snap);
    Ok(())
  }

  /// `for v1[, v2, …] in explist do … end` (§4.2.1). The iterator/state/
  /// control triple is evaluated with the multi-value adjustment, then
  /// copied into a fresh contiguous block so scratch registers above it
  /// can be reclaimed before the loop-variable registers are allocated.
  fn generic_for_stmt(&mut self, first_name: Token<'src>) -> Result<(), CompileError> {
    let mut names = vec![first_name];
    while self.matches(TokenKind::Tok_Comma) {
      names.push(self.expect_ident()?);
    }
    self.expect(TokenKind::Kw_In)?;
    let rhs = self.eval_rhs_list(3)?;
    self.expect(TokenKind::Kw_Do)?;

    let snap = self.state().regs.snapshot();
    let ctrl_span = names[0].span;
    let base = self.alloc_contiguous(3, ctrl_span)?;
    for i in 0..3usize {
      match rhs.get(i) {
        Some(&r) => {
          self.emit(OpCode::Move, base as i32 + i as i32, r as i32, 0);
        }
        None => {
          let k = self.constant(Value::Nil);
          self.emit(OpCode::LoadK, base as i32 + i as i32, k, 0);
        }
      }
    }
    self.state_mut().regs.reset_to(&[base, base + 1, base + 2]);

    let var_base = self.alloc_contiguous(names.len(), ctrl_span)?;
    let mut shadowed = Vec::new();
    for (i, n) in names.iter().enumerate() {
      let reg = var_base + i as u8;
      let prev = self.state_mut().locals.insert(n.lexeme.to_string(), reg);
      shadowed.push((n.lexeme.to_string(), prev));
    }
    let lock_iter = format!("@gfor@{base}@iter");
    let lock_state = format!("@gfor@{base}@state");
    let lock_ctrl = format!("@gfor@{base}@ctrl");
    self.state_mut().locals.insert(lock_iter.clone(), base);
    self.state_mut().locals.insert(lock_state.clone(), base + 1);
    self.state_mut().locals.insert(lock_ctrl.clone(), base + 2);

    let jmp_at = self.emit(OpCode::Jmp, 0, 0, 0);
    let body_start = self.here();
    self.state_mut().break_jumps.push(Vec::new());
    self.block(&[TokenKind::Kw_End])?;
    self.expect(TokenKind::Kw_End)?;
    let tforcall_site = self.here();
    self.patch_jump(jmp_at, tforcall_site);
    self.emit(OpCode::TForCall, base as i32, 0, names.len() as i32);
    let tforloop_at = self.emit(OpCode::TForLoop, base as i32 + 2, 0, 0);
    self.patch_jump(tforloop_at, body_start);
    let loop_exit = self.here();
    let breaks = self.state_mut().break_jumps.pop().unwrap();
    for b in breaks {
      self.patch_jump(b, loop_exit);
    }

    self.state_mut().locals.shift_remove(&lock_iter);
    self.state_mut().locals.shift_remove(&lock_state);
    self.state_mut().locals.shift_remove(&lock_ctrl);
    for (name, prev) in shadowed {
      match prev {
        Some(reg) => {
          self.state_mut().locals.insert(name, reg);
        }
        None => {
          self.state_mut().locals.shift_remove(&name);
        }
      }
    }
    self.state_mut().regs.restore(snap);
    Ok(())
  }

  fn break_stmt(&mut self) -> Result<(), CompileError> {
    let tok = self.advance();
    if self.state().break_jumps.is_empty() {
      return Err(CompileError::semantic("'break' used outside a loop", tok.span));
    }
    let at = self.emit(OpCode::Jmp, 0, 0, 0);
    self.state_mut().break_jumps.last_mut().unwrap().push(at);
    Ok(())
  }

  fn goto_stmt(&mut self) -> Result<(), CompileError> {
    self.advance(); // 'goto'
    let name = self.expect_ident()?;
    let at = self.emit(OpCode::Jmp, 0, 0, 0);
    self
      .state_mut()
      .pending_gotos
      .push(PendingGoto { name: name.lexeme.to_string(), at, span: name.span });
    Ok(())
  }

  fn label_stmt(&mut self) -> Result<(), CompileError> {
    self.advance(); // '::'
    let name = self.expect_ident()?;
    self.expect(TokenKind::Tok_DColon)?;
    if self.state().labels.contains_key(name.lexeme.as_ref()) {
      return Err(CompileError::semantic(format!("duplicate label '{}'", name.lexeme), name.span));
    }
    let here = self.here();
    self.state_mut().labels.insert(name.lexeme.to_string(), here);
    Ok(())
  }

  fn return_stmt(&mut self) -> Result<(), CompileError> {
    self.advance(); // 'return'
    let at_block_end = self.check_any(&[TokenKind::Kw_End, TokenKind::Kw_Else, TokenKind::Kw_Elseif, TokenKind::Tok_Eof])
      || self.check(TokenKind::Tok_Semi);
    if at_block_end {
      self.matches(TokenKind::Tok_Semi);
      self.emit(OpCode::Return, 0, 1, 0);
      return Ok(());
    }
    let mut exprs = Vec::new();
    loop {
      exprs.push(self.expr()?);
      if !self.matches(TokenKind::Tok_Comma) {
        break;
      }
    }
    self.matches(TokenKind::Tok_Semi);
    let span = self.peek().span;
    let base = self.alloc_contiguous(exprs.len(), span)?;
    for (i, r) in exprs.iter().enumerate() {
      self.emit(OpCode::Move, base as i32 + i as i32, *r as i32, 0);
    }
    self.emit(OpCode::Return, base as i32, (exprs.len() + 1) as i32, 0);
    Ok(())
  }

  /// `function name(...) … end`, including dotted (`function t.f(...)`)
  /// and method (`function t:f(...)`) forms (§4.2.2).
  fn function_stmt(&mut self) -> Result<(), CompileError> {
    self.advance(); // 'function'
    let first = self.expect_ident()?;
    let mut path = vec![first.lexeme.to_string()];
    let mut is_method = false;
    loop {
      if self.matches(TokenKind::Op_Dot) {
        path.push(self.expect_ident()?.lexeme.to_string());
      } else if self.matches(TokenKind::Tok_Colon) {
        path.push(self.expect_ident()?.lexeme.to_string());
        is_method = true;
        break;
      } else {
        break;
      }
    }
    let (mut params, is_vararg) = self.parse_param_list()?;
    if is_method {
      params.insert(0, "self".to_string());
    }
    let proto_idx = self.compile_function_body(&params, is_vararg)?;
    let dst = self.alloc(first.span)?;
    self.emit(OpCode::Closure, dst as i32, proto_idx as i32, 0);

    if path.len() == 1 {
      self.store_target(Suffixed::Name(path.remove(0), first.span), dst, first.span)?;
      return Ok(());
    }

    let idx = self.states.len() - 1;
    let mut reg = if let Some(&r) = self.states[idx].locals.get(&path[0]) {
      r
    } else if let Some(up) = self.resolve_upvalue(idx, &path[0]) {
      let r = self.alloc(first.span)?;
      self.emit(OpCode::GetUpval, r as i32, up as i32, 0);
      r
    } else {
      let k = self.constant(Value::string(path[0].clone()));
      let r = self.alloc(first.span)?;
      self.emit(OpCode::GetGlobal, r as i32, k, 0);
      r
    };
    for seg in &path[1..path.len() - 1] {
      let kidx = self.constant(Value::string(seg.clone()));
      let kreg = self.alloc(first.span)?;
      self.emit(OpCode::LoadK, kreg as i32, kidx, 0);
      let next = self.alloc(first.span)?;
      self.emit(OpCode::GetTable, next as i32, reg as i32, kreg as i32);
      reg = next;
    }
    let last = path.last().unwrap();
    let kidx = self.constant(Value::string(last.clone()));
    let kreg = self.alloc(first.span)?;
    self.emit(OpCode::LoadK, kreg as i32, kidx, 0);
    self.emit(OpCode::SetTable, reg as i32, kreg as i32, dst as i32);
    Ok(())
  }
}
