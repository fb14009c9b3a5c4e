use super::helpers::*;
use fluid_compiler::ast::{ExprKind, StmtKind};
use fluid_compiler::opcode::OpCode;
use fluid_compiler::CompileOptions;

/// The single value of `local x = <src>`.
fn local_value(src: &str) -> ExprKind {
    let block = parse_str(&format!("local x = {src}"));
    match &block.stmts[0].kind {
        StmtKind::Local { values, .. } => values[0].kind.clone(),
        other => panic!("expected local, got {other:?}"),
    }
}

#[test]
fn e2e_keep_all_filter_is_elided() {
    let plain = compile_str("local a, b = f()");
    for pattern in ["[*]", "[**]", "[***]"] {
        let filtered = compile_str(&format!("local a, b = {pattern}f()"));
        assert_eq!(filtered.code, plain.code, "{pattern}");
        assert_eq!(filtered.constants, plain.constants, "{pattern}");
    }
}

#[test]
fn e2e_result_filter_mask() {
    match local_value("[__*]f()") {
        ExprKind::ResultFilter(filter) => {
            assert_eq!(filter.count, 3);
            assert_eq!(filter.keep_mask & 0b111, 0b100);
            assert!(filter.trailing_keep);
            assert!(filter.call.is_call());
        }
        other => panic!("expected result filter, got {other:?}"),
    }
}

#[test]
fn e2e_result_filter_calls_filter_function() {
    let proto = compile_str("local a = [_*]f()");
    assert!(has_string_constant(&proto, "__filter"));
    assert!(has_opcode(&proto, OpCode::LoadFalse));
    assert_eq!(count_opcode(&proto, OpCode::Call), 2);
}

#[test]
fn e2e_presence_on_constants() {
    let empty = ["0", "\"\"", "nil", "false"];
    let present = ["1", "\"x\"", "{}"];
    for value in empty {
        let proto = compile_str(&format!("return {value}??"));
        assert!(has_opcode(&proto, OpCode::LoadFalse), "{value}");
        assert!(!has_opcode(&proto, OpCode::Test), "{value}");
    }
    for value in ["1", "\"x\""] {
        let proto = compile_str(&format!("return {value}??"));
        assert!(has_opcode(&proto, OpCode::LoadTrue), "{value}");
    }
    for value in present {
        assert!(matches!(local_value(&format!("{value}?")), ExprKind::Presence(_)), "{value}");
    }
}

#[test]
fn e2e_presence_tests_every_empty_value() {
    let proto = compile_str("local v\nreturn v?");
    assert!(has_opcode(&proto, OpCode::Test));
    assert!(has_opcode(&proto, OpCode::EqI));
    assert!(has_opcode(&proto, OpCode::EqK));
    assert!(has_string_constant(&proto, ""));
}

#[test]
fn e2e_if_empty_operator() {
    let proto = compile_str("local a\nreturn a ?? 5");
    assert!(has_opcode(&proto, OpCode::EqI));
    assert_eq!(find_opcode(&proto, OpCode::LoadI).unwrap().sbx(), 5);

    // A constant left operand decides at compile time.
    let proto = compile_str("return 0 ?? 5");
    assert!(!has_opcode(&proto, OpCode::EqI));
    assert_eq!(find_opcode(&proto, OpCode::LoadI).unwrap().sbx(), 5);
    let proto = compile_str("return 7 ?? 5");
    assert_eq!(find_opcode(&proto, OpCode::LoadI).unwrap().sbx(), 7);
}

#[test]
fn e2e_ternary() {
    let proto = compile_str("local c\nreturn c ? 1 :> 2");
    assert!(has_opcode(&proto, OpCode::Test));
    let loads: Vec<_> = proto
        .code
        .iter()
        .filter(|i| i.opcode() == OpCode::LoadI)
        .map(|i| (i.a(), i.sbx()))
        .collect();
    // Both branches land in the same register.
    assert_eq!(loads, vec![(1, 1), (1, 2)]);
}

#[test]
fn e2e_ternary_accepts_colon_separator() {
    assert_eq!(parse_str("return c ? a : b"), parse_str("return c ? a :> b"));
}

#[test]
fn e2e_pipe_is_a_call_with_prepended_argument() {
    let piped = compile_str("local y = x |> f(1)");
    let direct = compile_str("local y = f(x, 1)");
    assert_eq!(opcodes(&piped), opcodes(&direct));
    assert_eq!(find_opcode(&piped, OpCode::Call).unwrap().b(), 3);
}

#[test]
fn e2e_pipe_limit_adjusts_results() {
    let proto = compile_str("local y = g() |3> f()");
    let calls: Vec<_> = proto
        .code
        .iter()
        .filter(|i| i.opcode() == OpCode::Call)
        .map(|i| (i.b(), i.c()))
        .collect();
    assert_eq!(calls, vec![(1, 4), (4, 2)]);
}

#[test]
fn e2e_pipe_chain() {
    let proto = compile_str("local y = x |> f() |> g(2)");
    assert_eq!(count_opcode(&proto, OpCode::Call), 2);
}

#[test]
fn e2e_safe_navigation() {
    let proto = compile_str("local t\nreturn t?.a?.b");
    assert_eq!(count_opcode(&proto, OpCode::EqK), 2);
    assert_eq!(count_opcode(&proto, OpCode::GetField), 2);
    let proto = compile_str("local t, k\nreturn t?[k]");
    assert!(has_opcode(&proto, OpCode::EqK));
    assert!(has_opcode(&proto, OpCode::GetTable));
}

#[test]
fn e2e_safe_method_call() {
    let proto = compile_str("local o\nreturn o?:m(1)");
    assert!(has_opcode(&proto, OpCode::EqK));
    assert!(has_opcode(&proto, OpCode::Self_));
    assert_eq!(find_opcode(&proto, OpCode::Call).unwrap().c(), 2);
}

#[test]
fn e2e_deferred_expression_is_a_closure() {
    let proto = compile_str("local a = 1\nlocal thunk = <{ a + 1 }>");
    assert!(has_opcode(&proto, OpCode::Closure));
    let body = &proto.protos[0];
    assert_eq!(body.num_params, 0);
    assert!(has_opcode(body, OpCode::AddI));
    assert!(has_opcode(body, OpCode::Return1));
}

#[test]
fn e2e_increment_expression() {
    let proto = compile_str("local i = 0\nlocal j = i++");
    assert!(has_opcode(&proto, OpCode::AddI));
    let proto = compile_str("local t = {n = 0}\nlocal j = ++t.n");
    assert!(has_opcode(&proto, OpCode::GetField));
    assert!(has_opcode(&proto, OpCode::SetField));
}

#[test]
fn e2e_if_empty_assignment() {
    let proto = compile_str("local t = {}\nt.k ??= 5");
    assert!(has_opcode(&proto, OpCode::GetField));
    assert!(has_opcode(&proto, OpCode::EqI));
    assert!(has_opcode(&proto, OpCode::SetField));
}

#[test]
fn e2e_shorthand_fires_on_empty() {
    let proto = compile_str("local function f(x)\n  x?? return 1\n  return 2\nend");
    let f = &proto.protos[0];
    assert!(has_opcode(f, OpCode::Test));
    assert_eq!(count_opcode(f, OpCode::Return1), 2);
}

#[test]
fn e2e_shorthand_on_constants() {
    // Always empty: the body always runs.
    let proto = compile_str("local function f()\n  0?? return 1\n  return 2\nend");
    assert!(!has_opcode(&proto.protos[0], OpCode::Test));
    // Always present: nothing is emitted for the guard.
    let proto = compile_str("local function f()\n  1?? return 1\n  return 2\nend");
    let f = &proto.protos[0];
    assert!(!has_opcode(f, OpCode::Test));
    assert_eq!(count_opcode(f, OpCode::Return1), 1);
}

#[test]
fn e2e_folding_off_keeps_presence_tests() {
    let opts = CompileOptions::default().with_constant_folding(false);
    let proto = compile_with("return 0?", &opts);
    assert!(has_opcode(&proto, OpCode::EqI));
}

#[test]
fn e2e_multiple_assignment_structure() {
    let block = parse_str("a, b = 1, 2");
    match &block.stmts[0].kind {
        StmtKind::Assignment { targets, values, .. } => {
            assert_eq!(targets.len(), 2);
            assert_eq!(values.len(), 2);
        }
        other => panic!("expected assignment, got {other:?}"),
    }
}

#[test]
fn e2e_close_local_structure() {
    let block = parse_str("local x <close> = y");
    match &block.stmts[0].kind {
        StmtKind::Local { names, values } => {
            assert_eq!(names.len(), 1);
            assert_eq!(names[0].name, "x");
            assert!(names[0].has_close);
            assert_eq!(values.len(), 1);
            assert!(matches!(&values[0].kind, ExprKind::Identifier(n) if n == "y"));
        }
        other => panic!("expected local, got {other:?}"),
    }
}

/// Source filling the constant table past the 8-bit operand range.
fn with_many_constants(tail: &str) -> String {
    let mut src: String = (0..300).map(|i| format!("g.k{i} = 1\n")).collect();
    src.push_str(tail);
    src
}

/// The `EQ` against a loaded `""` never compares a register with itself.
fn assert_empty_string_test_uses_temp(src: &str) {
    let proto = compile_str(src);
    let eq = find_opcode(&proto, OpCode::Eq).unwrap_or_else(|| panic!("no EQ in\n{src}"));
    assert_ne!(eq.a(), eq.b(), "value and \"\" share a register");
    let load = proto
        .code
        .iter()
        .find(|i| i.opcode() == OpCode::LoadK && i.a() == eq.b())
        .expect("\"\" loaded into the compared register");
    assert_eq!(string_constant(&proto, load.bx() as usize), "");
}

#[test]
fn e2e_presence_with_wide_constant_table() {
    assert_empty_string_test_uses_temp(&with_many_constants("local r = f()?"));
}

#[test]
fn e2e_if_empty_with_wide_constant_table() {
    assert_empty_string_test_uses_temp(&with_many_constants("local r = f() ?? 2"));
}

#[test]
fn e2e_if_empty_assign_with_wide_constant_table() {
    assert_empty_string_test_uses_temp(&with_many_constants("local r = f()\nr ??= 2"));
}

#[test]
fn e2e_if_empty_operand_on_next_line() {
    let block = parse_str("local v = x ??\n  default()");
    assert_eq!(block.stmts.len(), 1);
    assert!(matches!(
        local_value("x ??\n  default()"),
        ExprKind::Binary { op: fluid_compiler::ast::BinaryOp::IfEmpty, .. }
    ));
}

#[test]
fn e2e_presence_operator_on_next_line() {
    let block = parse_str("local v = x\n  ??\nreturn v");
    assert_eq!(block.stmts.len(), 2);
    assert!(matches!(local_value("x\n  ??"), ExprKind::Presence(_)));
}
