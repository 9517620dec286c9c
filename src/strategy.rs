//! Opcode numbering strategies (§4.4).
//!
//! The emitter never hardcodes an opcode's canonical integer; it always
//! asks a `dyn OpCodeStrategy` for the number to bind `OP_<NAME>` to.
//! `Identity` preserves [`OpCode::canonical`], `Randomized` shuffles the
//! numbering once per emission and reuses the same permutation for every
//! instruction and every `decrypt_instruction` call site, so a single
//! compiled program is internally consistent even though two runs of the
//! compiler on the same input produce different numberings.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cell::RefCell;

use crate::bytecode::OpCode;

pub trait OpCodeStrategy {
  /// The integer this strategy assigns to `op` in this emission.
  fn get(&self, op: OpCode) -> i32;
}

/// Canonical numbering, i.e. `op.canonical()` unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl OpCodeStrategy for Identity {
  fn get(&self, op: OpCode) -> i32 {
    op.canonical() as i32
  }
}

/// A Fisher-Yates-shuffled permutation of `0..=OpCode::LAST_OP`, computed
/// once and memoized for the lifetime of the strategy so repeated lookups
/// during one emission agree with each other.
pub struct Randomized {
  permutation: RefCell<Option<[i32; 31]>>,
  rng: RefCell<StdRng>,
}

impl Randomized {
  pub fn new() -> Self {
    Randomized {
      permutation: RefCell::new(None),
      rng: RefCell::new(StdRng::from_entropy()),
    }
  }

  /// Deterministic constructor for tests (property P5: the same seed
  /// always produces the same numbering).
  pub fn with_seed(seed: u64) -> Self {
    Randomized {
      permutation: RefCell::new(None),
      rng: RefCell::new(StdRng::seed_from_u64(seed)),
    }
  }

  fn permutation(&self) -> [i32; 31] {
    if let Some(p) = *self.permutation.borrow() {
      return p;
    }
    let mut values: [i32; 31] = OpCode::ALL.map(|op| op.canonical() as i32);
    values.shuffle(&mut *self.rng.borrow_mut());
    *self.permutation.borrow_mut() = Some(values);
    values
  }
}

impl Default for Randomized {
  fn default() -> Self {
    Self::new()
  }
}

impl OpCodeStrategy for Randomized {
  fn get(&self, op: OpCode) -> i32 {
    self.permutation()[op.canonical() as usize]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identity_preserves_canonical_numbering() {
    let s = Identity;
    for op in OpCode::ALL {
      assert_eq!(s.get(op), op.canonical() as i32);
    }
  }

  #[test]
  fn randomized_is_a_bijection_over_the_opcode_range() {
    let s = Randomized::with_seed(42);
    let mut seen: Vec<i32> = OpCode::ALL.iter().map(|op| s.get(*op)).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..=OpCode::LAST_OP as i32).collect::<Vec<_>>());
  }

  #[test]
  fn randomized_numbering_is_stable_within_one_strategy_instance() {
    let s = Randomized::with_seed(7);
    let first = s.get(OpCode::Call);
    let second = s.get(OpCode::Call);
    assert_eq!(first, second);
  }

  #[test]
  fn same_seed_reproduces_same_numbering() {
    let a = Randomized::with_seed(123);
    let b = Randomized::with_seed(123);
    for op in OpCode::ALL {
      assert_eq!(a.get(op), b.get(op));
    }
  }
}
