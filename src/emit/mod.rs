//! Emits a compiled [`Prototype`] tree as SL source text (§4.3).
//!
//! The emitter is a pure function of (prototype tree, opcode strategy,
//! flags). It never re-derives the fixed [`driver`] text from the
//! bytecode; its only job is to serialize the prototype tree and splice
//! it in front of that text.

mod driver;
mod minify;

use crate::bytecode::{Instruction, OpCode, Prototype};
use crate::strategy::OpCodeStrategy;
use crate::value::Value;

/// Flags controlling obfuscation of the emitted program.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmitOptions {
  /// Apply the whitespace minifier to the final text.
  pub pack: bool,
  /// XOR-encrypt string constants and instruction tuples.
  pub encrypt: bool,
}

/// Emits `proto` as a complete, runnable SL source string.
pub fn emit(proto: &Prototype, strategy: &dyn OpCodeStrategy, options: EmitOptions) -> String {
  let mut out = String::new();

  write_opcode_bank(&mut out, strategy);

  if options.encrypt {
    out.push_str(driver::DECRYPT_HELPERS);
  }

  out.push_str("local main_proto = ");
  write_proto(&mut out, proto, strategy, options.encrypt);
  out.push('\n');

  out.push_str(driver::PROLOGUE);
  out.push_str(if options.encrypt { driver::FETCH_ENCRYPTED } else { driver::FETCH_PLAIN });
  out.push_str(driver::BODY);

  if options.pack {
    minify::minify(&out)
  } else {
    out
  }
}

fn write_opcode_bank(out: &mut String, strategy: &dyn OpCodeStrategy) {
  for op in OpCode::ALL {
    out.push_str(&format!("local {} = {}\n", op.name(), strategy.get(op)));
  }
  out.push('\n');
}

fn write_proto(out: &mut String, proto: &Prototype, strategy: &dyn OpCodeStrategy, encrypt: bool) {
  out.push_str("{\n");
  out.push_str(&format!("  numParams = {},\n", proto.num_params));

  out.push_str("  constants = {\n");
  for (i, v) in proto.constants.iter().enumerate() {
    out.push_str(&format!("    [{i}] = {},\n", render_constant(v, encrypt)));
  }
  out.push_str("  },\n");

  out.push_str("  code = {\n");
  for (i, inst) in proto.instructions.iter().enumerate() {
    let pc = i + 1; // 1-based, matching the VM driver's `pc`
    out.push_str("    ");
    out.push_str(&render_instruction(inst, strategy, pc, encrypt));
    out.push_str(",\n");
  }
  out.push_str("  },\n");

  out.push_str("  protos = {\n");
  for (i, child) in proto.protos.iter().enumerate() {
    out.push_str(&format!("    [{i}] = "));
    write_proto(out, child, strategy, encrypt);
    out.push_str(",\n");
  }
  out.push_str("  },\n");

  out.push_str("  upvalues = {\n");
  for (i, uv) in proto.upvalues.iter().enumerate() {
    out.push_str(&format!("    [{i}] = {{ isLocal = {}, index = {} }},\n", uv.is_local, uv.index));
  }
  out.push_str("  }\n");

  out.push('}');
}

/// Numbers in default numeric form, booleans as `true`/`false`, nil as
/// `nil`, strings as `"…"` with no escape translation — a `"` inside a
/// string constant is a known limitation — or, under `encrypt`, as
/// `decrypt_string({b1,b2,…})`.
fn render_constant(v: &Value, encrypt: bool) -> String {
  match v {
    Value::Nil => "nil".to_string(),
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => format!("{n}"),
    Value::String(s) => {
      if encrypt {
        let bytes: Vec<String> = s.as_bytes().iter().map(|b| (b ^ 0xAA).to_string()).collect();
        format!("decrypt_string({{{}}})", bytes.join(","))
      } else {
        format!("\"{s}\"")
      }
    }
  }
}

/// Plain: `{op, a, b, c}`. Under `encrypt`: each field XORed with
/// `0xDEADBEEF ^ pc`, matching the reference generator's unsigned
/// 32-bit XOR (a negative operand's two's-complement bit pattern is
/// preserved by the `as u32` cast, exactly as the C++ `int -> unsigned
/// int` conversion it was ported from).
fn render_instruction(inst: &Instruction, strategy: &dyn OpCodeStrategy, pc: usize, encrypt: bool) -> String {
  let op = strategy.get(inst.op);
  if !encrypt {
    return format!("{{{}, {}, {}, {}}}", op, inst.a, inst.b, inst.c);
  }
  let key = 0xDEADBEEFu32 ^ (pc as u32);
  let x = |v: i32| (v as u32) ^ key;
  format!("{{{}, {}, {}, {}}}", x(op), x(inst.a), x(inst.b), x(inst.c))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bytecode::UpvalueInfo;
  use crate::strategy::Identity;

  fn sample_proto() -> Prototype {
    let mut p = Prototype::new();
    p.num_params = 1;
    p.constants.push(Value::Number(3.0));
    p.constants.push(Value::string("hi"));
    p.instructions.push(Instruction::new(OpCode::LoadK, 1, 0, 0));
    p.instructions.push(Instruction::new(OpCode::Return, 0, 1, 0));
    p.upvalues.push(UpvalueInfo { is_local: true, index: 0 });
    p
  }

  #[test]
  fn plain_emission_contains_opcode_bank_and_proto_table() {
    let proto = sample_proto();
    let text = emit(&proto, &Identity, EmitOptions::default());
    assert!(text.contains("local OP_RETURN = 30\n"));
    assert!(text.contains("numParams = 1"));
    assert!(text.contains("\"hi\""));
    assert!(text.contains("run_vm({ proto = main_proto, upvalues = {} }, {})"));
    assert!(!text.contains("decrypt_string"));
  }

  #[test]
  fn encrypt_emits_decrypt_helpers_and_obscures_constants() {
    let proto = sample_proto();
    let text = emit(&proto, &Identity, EmitOptions { pack: false, encrypt: true });
    assert!(text.contains("local function decrypt_string"));
    assert!(text.contains("local function decrypt_instruction"));
    assert!(text.contains("decrypt_string({"));
    assert!(!text.contains("\"hi\""));
  }

  #[test]
  fn pack_strips_comments_and_collapses_whitespace() {
    let proto = sample_proto();
    let text = emit(&proto, &Identity, EmitOptions { pack: true, encrypt: false });
    assert!(!text.contains("  "));
    assert!(!text.contains("-- Global environment"));
  }

  #[test]
  fn randomized_strategy_changes_opcode_bank_numbering() {
    use crate::strategy::Randomized;
    let proto = sample_proto();
    let identity_text = emit(&proto, &Identity, EmitOptions::default());
    let randomized_text = emit(&proto, &Randomized::with_seed(1), EmitOptions::default());
    let identity_bank: Vec<&str> = identity_text.lines().take(OpCode::ALL.len()).collect();
    let randomized_bank: Vec<&str> = randomized_text.lines().take(OpCode::ALL.len()).collect();
    assert_ne!(identity_bank, randomized_bank);
  }
}
