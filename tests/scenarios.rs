//! Black-box scenarios S1-S6 (§8), exercised against the public
//! `compile` entry point and the shape of its emitted text — the
//! closest black-box proxy available to a Prototype shape assertion
//! without a Lua runtime to actually execute the emitted driver on.

use indoc::indoc;
use slc::bytecode::OpCode;
use slc::{compile, CompileOptions};

fn op_const(op: OpCode) -> String {
  format!("{} = {}", op.name(), op.canonical())
}

/// An instruction row's unambiguous prefix: `{<canonical>,` — the
/// trailing comma rules out collisions between e.g. `ADD` (2) and
/// `SETTABLE` (20).
fn row_prefix(op: OpCode) -> String {
  format!("{{{},", op.canonical())
}

/// Splits the root prototype's rendered `code = { ... }` block into its
/// instruction rows (each missing its trailing `}` consumed by the
/// split, which is fine — tests only inspect each row's head and its
/// operand count). Robust to both pretty-printed and minified output.
fn root_code_rows(text: &str) -> Vec<&str> {
  let start = text.find("code = {").expect("no code table") + "code = {".len();
  let after = &text[start..];
  let end = after.find("protos = {").expect("no protos table after code table");
  after[..end].split("},").map(|s| s.trim()).filter(|s| s.starts_with('{')).collect()
}

#[test]
fn s1_arithmetic_expression_evaluates_and_returns() {
  let src = indoc! {"
        local x = 1 + 2
        return x
    "};
  let out = compile(src, CompileOptions::default()).unwrap();

  assert!(out.contains(&op_const(OpCode::LoadK)));
  assert!(out.contains(&op_const(OpCode::Add)));
  assert!(out.contains(&op_const(OpCode::Return)));

  let rows = root_code_rows(&out);
  let add_idx = rows.iter().position(|r| r.starts_with(&row_prefix(OpCode::Add))).expect("no ADD row");
  let return_idx = rows.iter().position(|r| r.starts_with(&row_prefix(OpCode::Return))).expect("no RETURN row");
  assert!(add_idx < return_idx, "ADD must precede the final RETURN");

  let loadk_count = rows[..add_idx].iter().filter(|r| r.starts_with(&row_prefix(OpCode::LoadK))).count();
  assert_eq!(loadk_count, 2, "expected one LOADK each for the 1 and the 2 literal");
}

#[test]
fn s2_nested_function_capturing_a_local_emits_closure_and_upvalue_ops() {
  let src = indoc! {"
        function mk()
          local c = 0
          function inc()
            c = c + 1
            return c
          end
          return inc
        end
    "};
  let out = compile(src, CompileOptions::default()).unwrap();

  assert!(out.contains(&op_const(OpCode::Closure)));
  assert!(out.contains(&op_const(OpCode::GetUpval)));
  assert!(out.contains(&op_const(OpCode::SetUpval)));
  assert!(out.contains("isLocal = true"));
}

#[test]
fn s3_table_constructor_emits_array_and_keyed_settable() {
  let src = indoc! {r#"
        local t = {10, 20, [5] = "x", k = 7}
    "#};
  let out = compile(src, CompileOptions::default()).unwrap();

  assert!(out.contains(&op_const(OpCode::NewTable)));
  let settable_rows = root_code_rows(&out).iter().filter(|r| r.starts_with(&row_prefix(OpCode::SetTable))).count();
  assert_eq!(settable_rows, 4, "one SETTABLE per entry: 10, 20, [5]=\"x\", k=7");
  assert!(out.contains('7'));
  assert!(out.contains("\"x\""));
  assert!(out.contains("\"k\""));
}

#[test]
fn s4_numeric_for_emits_forprep_and_forloop() {
  let src = indoc! {r#"
        for i = 1, 3 do
          print(i)
        end
    "#};
  let out = compile(src, CompileOptions::default()).unwrap();

  assert!(out.contains(&op_const(OpCode::ForPrep)));
  assert!(out.contains(&op_const(OpCode::ForLoop)));

  let rows = root_code_rows(&out);
  let prep_idx = rows.iter().position(|r| r.starts_with(&row_prefix(OpCode::ForPrep))).expect("no FORPREP");
  let loop_idx = rows.iter().position(|r| r.starts_with(&row_prefix(OpCode::ForLoop))).expect("no FORLOOP");
  assert!(prep_idx < loop_idx, "FORPREP must precede FORLOOP");
}

#[test]
fn s5_or_chain_stores_the_truthy_operand_not_a_boolean() {
  let src = indoc! {r#"
        local a = false or "x"
    "#};
  let out = compile(src, CompileOptions::default()).unwrap();

  let rows = root_code_rows(&out);
  assert!(rows.iter().all(|r| !r.starts_with(&row_prefix(OpCode::Eq))), "or does not coerce its result to a boolean");
  assert!(out.contains("\"x\""));
}

#[test]
fn s6_flag_combinations_preserve_instruction_shape() {
  let src = "local x = 1 + 2\nreturn x";
  let plain = compile(src, CompileOptions::default()).unwrap();
  let obfuscated = compile(src, CompileOptions { vmp: true, pack: true, encrypt: true }).unwrap();

  let plain_rows = root_code_rows(&plain);
  let obf_rows = root_code_rows(&obfuscated);
  assert_eq!(plain_rows.len(), obf_rows.len(), "obfuscation must not add or remove instructions");

  for row in &obf_rows {
    assert_eq!(row.matches(',').count(), 3, "every instruction row keeps its 4 operands");
  }
}
