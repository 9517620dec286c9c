//! The bytecode model: opcodes, instructions and per-function prototypes.
//!
//! This mirrors the teacher crate's separation of a small, `repr(u8)`-ish
//! opcode enum from the instruction/prototype records that reference it
//! (`src/op.rs`'s `Instruction` vs. `src/value.rs`'s constant pool), but
//! trimmed down to the flat three-address `{op, a, b, c}` shape the
//! emitted VM driver actually interprets (§6.2) rather than the teacher's
//! own accumulator-based encoding.

use crate::value::Value;

/// Canonical opcode numbering (§4.5). `Identity` strategy returns these
/// numbers unchanged; `Randomized` permutes them. The discriminants below
/// are never serialized directly — always go through an
/// [`OpCodeStrategy`][crate::strategy::OpCodeStrategy].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
  Move,
  LoadK,
  Add,
  Sub,
  Mul,
  Div,
  IDiv,
  Mod,
  Concat,
  Len,
  Not,
  Eq,
  Lt,
  Le,
  Jmp,
  JmpFalse,
  GetGlobal,
  SetGlobal,
  NewTable,
  GetTable,
  SetTable,
  Call,
  Closure,
  GetUpval,
  SetUpval,
  Vararg,
  ForPrep,
  ForLoop,
  TForCall,
  TForLoop,
  Return,
}

impl OpCode {
  /// All opcodes in canonical order; `ALL.len() - 1 == LAST_OP`.
  pub const ALL: [OpCode; 31] = [
    OpCode::Move,
    OpCode::LoadK,
    OpCode::Add,
    OpCode::Sub,
    OpCode::Mul,
    OpCode::Div,
    OpCode::IDiv,
    OpCode::Mod,
    OpCode::Concat,
    OpCode::Len,
    OpCode::Not,
    OpCode::Eq,
    OpCode::Lt,
    OpCode::Le,
    OpCode::Jmp,
    OpCode::JmpFalse,
    OpCode::GetGlobal,
    OpCode::SetGlobal,
    OpCode::NewTable,
    OpCode::GetTable,
    OpCode::SetTable,
    OpCode::Call,
    OpCode::Closure,
    OpCode::GetUpval,
    OpCode::SetUpval,
    OpCode::Vararg,
    OpCode::ForPrep,
    OpCode::ForLoop,
    OpCode::TForCall,
    OpCode::TForLoop,
    OpCode::Return,
  ];

  /// Highest canonical opcode number, i.e. `Return`'s index.
  pub const LAST_OP: u8 = (Self::ALL.len() - 1) as u8;

  /// The `OP_<NAME>` identifier the emitter binds this opcode to in the
  /// emitted SL source (§4.3 item 1).
  pub fn name(&self) -> &'static str {
    match self {
      OpCode::Move => "OP_MOVE",
      OpCode::LoadK => "OP_LOADK",
      OpCode::Add => "OP_ADD",
      OpCode::Sub => "OP_SUB",
      OpCode::Mul => "OP_MUL",
      OpCode::Div => "OP_DIV",
      OpCode::IDiv => "OP_IDIV",
      OpCode::Mod => "OP_MOD",
      OpCode::Concat => "OP_CONCAT",
      OpCode::Len => "OP_LEN",
      OpCode::Not => "OP_NOT",
      OpCode::Eq => "OP_EQ",
      OpCode::Lt => "OP_LT",
      OpCode::Le => "OP_LE",
      OpCode::Jmp => "OP_JMP",
      OpCode::JmpFalse => "OP_JMP_FALSE",
      OpCode::GetGlobal => "OP_GETGLOBAL",
      OpCode::SetGlobal => "OP_SETGLOBAL",
      OpCode::NewTable => "OP_NEWTABLE",
      OpCode::GetTable => "OP_GETTABLE",
      OpCode::SetTable => "OP_SETTABLE",
      OpCode::Call => "OP_CALL",
      OpCode::Closure => "OP_CLOSURE",
      OpCode::GetUpval => "OP_GETUPVAL",
      OpCode::SetUpval => "OP_SETUPVAL",
      OpCode::Vararg => "OP_VARARG",
      OpCode::ForPrep => "OP_FORPREP",
      OpCode::ForLoop => "OP_FORLOOP",
      OpCode::TForCall => "OP_TFORCALL",
      OpCode::TForLoop => "OP_TFORLOOP",
      OpCode::Return => "OP_RETURN",
    }
  }

  /// The canonical integer for this opcode, i.e. its position in [`OpCode::ALL`].
  pub fn canonical(&self) -> u8 {
    *self as u8
  }
}

/// One bytecode instruction: an opcode plus three integer operands.
/// `b` doubles as a signed jump/constant-index operand depending on `op`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instruction {
  pub op: OpCode,
  pub a: i32,
  pub b: i32,
  pub c: i32,
}

impl Instruction {
  pub fn new(op: OpCode, a: i32, b: i32, c: i32) -> Self {
    Instruction { op, a, b, c }
  }
}

/// An upvalue captured by a nested function. If `is_local`, `index` names
/// a register in the immediately enclosing prototype; otherwise it names
/// an entry in the enclosing prototype's own `upvalues` table (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpvalueInfo {
  pub is_local: bool,
  pub index: usize,
}

/// The compiled representation of one function.
#[derive(Clone, Debug, Default)]
pub struct Prototype {
  pub instructions: Vec<Instruction>,
  pub constants: Vec<Value>,
  pub protos: Vec<Prototype>,
  pub upvalues: Vec<UpvalueInfo>,
  pub num_params: usize,
}

impl Prototype {
  pub fn new() -> Self {
    Self::default()
  }

  /// I1: every jump offset targets an in-range instruction within this
  /// prototype (relative to the instruction after the jump). I6: the
  /// final instruction is a `RETURN`. Recurses into children (I2–I5 are
  /// enforced structurally by construction and spot-checked in tests).
  pub fn check_invariants(&self) -> Result<(), String> {
    use OpCode::*;
    let len = self.instructions.len() as i32;
    if !matches!(self.instructions.last().map(|i| i.op), Some(Return)) {
      return Err("prototype does not end in RETURN".into());
    }
    for (i, inst) in self.instructions.iter().enumerate() {
      let i = i as i32;
      let is_jump = matches!(
        inst.op,
        Jmp | JmpFalse | ForPrep | ForLoop | TForLoop
      );
      if is_jump {
        let target = i + 1 + inst.b;
        if target < 0 || target > len {
          return Err(format!("jump at {i} targets out-of-range instruction {target}"));
        }
      }
      if let Closure = inst.op {
        if inst.b < 0 || inst.b as usize >= self.protos.len() {
          return Err(format!("CLOSURE at {i} references invalid proto {}", inst.b));
        }
      }
      if matches!(inst.op, LoadK | GetGlobal | SetGlobal) && (inst.b < 0 || inst.b as usize >= self.constants.len()) {
        return Err(format!("instruction at {i} references invalid constant {}", inst.b));
      }
      if matches!(inst.op, GetUpval | SetUpval) && (inst.b < 0 || inst.b as usize >= self.upvalues.len()) {
        return Err(format!("instruction at {i} references invalid upvalue {}", inst.b));
      }
    }
    for p in &self.protos {
      p.check_invariants()?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn opcode_names_are_unique() {
    let mut names: Vec<&str> = OpCode::ALL.iter().map(OpCode::name).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), OpCode::ALL.len());
  }

  #[test]
  fn canonical_numbering_matches_position() {
    for (i, op) in OpCode::ALL.iter().enumerate() {
      assert_eq!(op.canonical() as usize, i);
    }
  }

  #[test]
  fn rejects_prototype_without_trailing_return() {
    let mut proto = Prototype::new();
    proto.instructions.push(Instruction::new(OpCode::LoadK, 0, 0, 0));
    assert!(proto.check_invariants().is_err());
  }

  #[test]
  fn accepts_minimal_valid_prototype() {
    let mut proto = Prototype::new();
    proto.instructions.push(Instruction::new(OpCode::Return, 0, 1, 0));
    assert!(proto.check_invariants().is_ok());
  }
}
