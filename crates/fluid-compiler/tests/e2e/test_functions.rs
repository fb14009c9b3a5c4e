use super::helpers::*;
use fluid_compiler::ast::StmtKind;
use fluid_compiler::opcode::OpCode;

#[test]
fn e2e_function_no_params() {
    let proto = compile_str("function f() end");
    assert!(has_opcode(&proto, OpCode::Closure));
    assert_eq!(proto.protos.len(), 1);
    assert_eq!(proto.protos[0].num_params, 0);
    assert!(!proto.protos[0].is_vararg);
}

#[test]
fn e2e_function_with_params() {
    let proto = compile_str("function f(a, b, c) return a end");
    assert_eq!(proto.protos[0].num_params, 3);
}

#[test]
fn e2e_function_vararg() {
    let proto = compile_str("function f(...) return ... end");
    assert!(proto.protos[0].is_vararg);
    assert!(has_opcode(&proto.protos[0], OpCode::VarArgPrep));
    assert!(has_opcode(&proto.protos[0], OpCode::VarArg));
}

#[test]
fn e2e_function_mixed_params_vararg() {
    let proto = compile_str("function f(a, b, ...) end");
    assert_eq!(proto.protos[0].num_params, 2);
    assert!(proto.protos[0].is_vararg);
}

#[test]
fn e2e_method_definition() {
    let proto = compile_str("function t:m(x) return self, x end");
    // self + x
    assert_eq!(proto.protos[0].num_params, 2);
    assert!(has_opcode(&proto, OpCode::SetField));
}

#[test]
fn e2e_method_definition_flags_self() {
    let block = parse_str("function T:m(x) end");
    let StmtKind::Function { path, func } = &block.stmts[0].kind else {
        panic!("expected function statement, got {:?}", block.stmts[0].kind);
    };
    assert_eq!(path.method.as_deref(), Some("m"));
    let names: Vec<(&str, bool)> = func.params.iter().map(|p| (p.name.as_str(), p.is_self)).collect();
    assert_eq!(names, vec![("self", true), ("x", false)]);
}

#[test]
fn e2e_closure_upvalue_capture() {
    let proto = compile_str("local x = 1\nfunction f() return x end");
    let up = &proto.protos[0].upvalues[0];
    assert_eq!(up.name.as_deref(), Some("x"));
    assert!(up.in_stack);
    assert_eq!(up.index, 0);
}

#[test]
fn e2e_globals_in_nested_function_capture_env() {
    let proto = compile_str("function f() return print end");
    let up = &proto.protos[0].upvalues[0];
    assert_eq!(up.name.as_deref(), Some("_ENV"));
    assert!(!up.in_stack);
}

#[test]
fn e2e_nested_closure() {
    let proto = compile_str("local x = 1\nfunction outer()\n  function inner() return x end\nend");
    assert_eq!(proto.protos.len(), 1);
    assert_eq!(proto.protos[0].protos.len(), 1);
}

#[test]
fn e2e_local_function_recursive() {
    let proto = compile_str("local function fib(n)\n  if n then return fib end\n  return n\nend");
    assert!(has_opcode(&proto, OpCode::Closure));
    // The function sees itself as an upvalue.
    assert_eq!(proto.protos[0].upvalues[0].name.as_deref(), Some("fib"));
}

#[test]
fn e2e_function_return0() {
    let proto = compile_str("function f() end");
    assert!(has_opcode(&proto.protos[0], OpCode::Return0));
}

#[test]
fn e2e_function_expression() {
    let proto = compile_str("local f = function(x) return x end");
    assert!(has_opcode(&proto, OpCode::Closure));
    assert!(has_opcode(&proto.protos[0], OpCode::Return1));
}

#[test]
fn e2e_function_call_with_args() {
    let proto = compile_str("f(1, 2, 3)");
    assert_eq!(find_opcode(&proto, OpCode::Call).unwrap().b(), 4);
}

#[test]
fn e2e_function_call_with_string_arg() {
    let proto = compile_str("f \"hello\"");
    assert!(has_opcode(&proto, OpCode::Call));
    assert!(has_string_constant(&proto, "hello"));
}

#[test]
fn e2e_function_call_with_table_arg() {
    let proto = compile_str("f {1, 2}");
    assert!(has_opcode(&proto, OpCode::Call));
    assert!(has_opcode(&proto, OpCode::NewTable));
}

#[test]
fn e2e_tail_call() {
    let proto = compile_str("function f(x) return g(x) end");
    assert!(has_opcode(&proto.protos[0], OpCode::TailCall));
}

#[test]
fn e2e_no_tail_call_with_close_variable() {
    let proto = compile_str("function f(x)\n  local c <close> = x\n  return g(x)\nend");
    assert!(!has_opcode(&proto.protos[0], OpCode::TailCall));
    assert!(has_opcode(&proto.protos[0], OpCode::Call));
}

#[test]
fn e2e_function_lines() {
    let proto = compile_str("local a\n\nfunction f()\n  return 1\nend");
    assert_eq!(proto.protos[0].line_defined, 3);
    assert_eq!(proto.protos[0].last_line_defined, 5);
}

#[test]
fn e2e_arrow_function_matches_function_literal() {
    assert_eq!(
        parse_str("local f = x => x + 1"),
        parse_str("local f = function(x) return x + 1 end")
    );
    assert_eq!(
        parse_str("run(() => do step() end)"),
        parse_str("run(function() step() end)")
    );
}

#[test]
fn e2e_arrow_function_as_argument() {
    let proto = compile_str("table.sort(items, (a, b) => a.rank < b.rank)");
    assert!(has_opcode(&proto, OpCode::Closure));
    let cmp = &proto.protos[0];
    assert_eq!(cmp.num_params, 2);
    assert!(has_opcode(cmp, OpCode::Lt));
}
