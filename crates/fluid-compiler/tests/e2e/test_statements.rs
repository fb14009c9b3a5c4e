use super::helpers::*;
use fluid_compiler::opcode::OpCode;

#[test]
fn e2e_local_declaration() {
    let proto = compile_str("local x = 42");
    assert!(has_opcode(&proto, OpCode::LoadI));
    assert_eq!(proto.local_vars[0].name, "x");
}

#[test]
fn e2e_local_nil_default() {
    let proto = compile_str("local x, y, z");
    let loadnil = find_opcode(&proto, OpCode::LoadNil).unwrap();
    assert_eq!(count_opcode(&proto, OpCode::LoadNil), 1);
    assert_eq!((loadnil.a(), loadnil.b()), (0, 2));
}

#[test]
fn e2e_local_multiple_with_values() {
    let proto = compile_str("local a, b = 1, 2");
    assert_eq!(count_opcode(&proto, OpCode::LoadI), 2);
}

#[test]
fn e2e_local_fewer_values() {
    let proto = compile_str("local a, b, c = 1");
    assert!(has_opcode(&proto, OpCode::LoadI));
    let loadnil = find_opcode(&proto, OpCode::LoadNil).unwrap();
    assert_eq!((loadnil.a(), loadnil.b()), (1, 1));
}

#[test]
fn e2e_local_function() {
    let proto = compile_str("local function f(x) return x end");
    assert!(has_opcode(&proto, OpCode::Closure));
    assert_eq!(proto.protos.len(), 1);
    assert_eq!(proto.protos[0].num_params, 1);
}

#[test]
fn e2e_typed_params_compile_like_untyped() {
    let typed = compile_str("local function f(a: num, b: str, c: table) return a end");
    let plain = compile_str("local function f(a, b, c) return a end");
    assert_eq!(typed.protos[0].code, plain.protos[0].code);
}

#[test]
fn e2e_global_assign() {
    let proto = compile_str("x = 42");
    assert!(has_opcode(&proto, OpCode::SetTabUp));
}

#[test]
fn e2e_global_read() {
    let proto = compile_str("return x");
    assert!(has_opcode(&proto, OpCode::GetTabUp));
}

#[test]
fn e2e_if_simple() {
    // Constant true: no test needed, body always runs
    let proto = compile_str("if true then local x = 1 end");
    assert!(!has_opcode(&proto, OpCode::Test));
    let proto = compile_str("local y\nif y then local x = 1 end");
    assert!(has_opcode(&proto, OpCode::Test));
    assert!(has_opcode(&proto, OpCode::Jmp));
}

#[test]
fn e2e_if_else() {
    let proto = compile_str("local c\nif c then local x = 1 elseif c then local y = 2 else local z = 3 end");
    assert_eq!(count_opcode(&proto, OpCode::Test), 2);
    assert!(count_opcode(&proto, OpCode::Jmp) >= 3);
}

#[test]
fn e2e_while_loop() {
    let proto = compile_str("local i = 10\nwhile i do i = nil end");
    assert!(has_opcode(&proto, OpCode::Test));
    // One for the test, one for the back-jump.
    assert!(count_opcode(&proto, OpCode::Jmp) >= 2);
}

#[test]
fn e2e_repeat_until() {
    let proto = compile_str("repeat local x = 1 until true");
    assert!(!has_opcode(&proto, OpCode::Test));
    let proto = compile_str("local y\nrepeat local x = 1 until y");
    assert!(has_opcode(&proto, OpCode::Test));
}

#[test]
fn e2e_numeric_for() {
    let proto = compile_str("for i = 1, 10 do local x = i end");
    assert!(has_opcode(&proto, OpCode::ForPrep));
    assert!(has_opcode(&proto, OpCode::ForLoop));
    let names: Vec<&str> = proto.local_vars.iter().map(|v| v.name.as_str()).collect();
    assert!(names.contains(&"(for state)"));
    assert!(names.contains(&"i"));
}

#[test]
fn e2e_numeric_for_with_step() {
    let proto = compile_str("for i = 10, 1, -1 do local x = i end");
    assert!(has_opcode(&proto, OpCode::ForPrep));
    assert!(has_opcode(&proto, OpCode::ForLoop));
}

#[test]
fn e2e_generic_for() {
    let proto = compile_str("for k, v in pairs do end");
    assert!(has_opcode(&proto, OpCode::TForPrep));
    assert!(has_opcode(&proto, OpCode::TForCall));
    assert!(has_opcode(&proto, OpCode::TForLoop));
}

#[test]
fn e2e_do_end() {
    let proto = compile_str("do local x = 1 end\nlocal y = 2");
    assert_eq!(count_opcode(&proto, OpCode::LoadI), 2);
    // `y` reuses the register released by `x`.
    assert_eq!(proto.code[2].a(), 0);
}

#[test]
fn e2e_break() {
    let proto = compile_str("while true do break end");
    assert!(has_opcode(&proto, OpCode::Jmp));
}

#[test]
fn e2e_continue_jumps_to_loop_test() {
    let proto = compile_str("local i = 0\nwhile i do\n  if i then continue end\n  i = nil\nend");
    assert!(count_opcode(&proto, OpCode::Jmp) >= 3);
}

#[test]
fn e2e_continue_in_numeric_for() {
    let proto = compile_str("for i = 1, 3 do\n  if i then continue end\n  f(i)\nend");
    assert!(has_opcode(&proto, OpCode::ForLoop));
    assert!(has_opcode(&proto, OpCode::Call));
}

#[test]
fn e2e_return_empty() {
    let proto = compile_str("return");
    assert!(has_opcode(&proto, OpCode::Return0) || has_opcode(&proto, OpCode::Return));
}

#[test]
fn e2e_return_single() {
    let proto = compile_str("return 1");
    assert!(has_opcode(&proto, OpCode::Return1) || has_opcode(&proto, OpCode::Return));
}

#[test]
fn e2e_semicolons() {
    let proto = compile_str(";;;local x = 1;;;");
    assert!(has_opcode(&proto, OpCode::LoadI));
}

#[test]
fn e2e_function_call_statement() {
    let proto = compile_str("print(42)");
    let call = find_opcode(&proto, OpCode::Call).unwrap();
    assert_eq!(call.c(), 1);
}

#[test]
fn e2e_multiple_assignment() {
    let proto = compile_str("local a, b\na, b = 1, 2");
    assert_eq!(count_opcode(&proto, OpCode::LoadI), 2);
}

#[test]
fn e2e_local_const() {
    let proto = compile_str("local x <const> = 42\nreturn x + 1");
    assert!(has_opcode(&proto, OpCode::LoadI));
    assert_eq!(proto.local_vars[0].name, "x");
}

#[test]
fn e2e_local_close() {
    let proto = compile_str("local x <close> = y");
    assert!(has_opcode(&proto, OpCode::Tbc));
    // The main chunk returns through a full RETURN so the VM closes `x`.
    assert!(has_opcode(&proto, OpCode::Return));
}

#[test]
fn e2e_nested_blocks() {
    let proto = compile_str("do\n  do\n    local x = 1\n  end\n  local y = 2\nend");
    assert_eq!(count_opcode(&proto, OpCode::LoadI), 2);
}

#[test]
fn e2e_compound_assignment() {
    let proto = compile_str("local a = 1\na += 2\na -= 3\na *= 4\na /= 5\na %= 6\na ..= 'x'");
    assert!(has_opcode(&proto, OpCode::AddI));
    assert!(has_opcode(&proto, OpCode::MulK) || has_opcode(&proto, OpCode::Mul));
    assert!(has_opcode(&proto, OpCode::Concat));
}

#[test]
fn e2e_increment_statement() {
    let inc = compile_str("local n = 0\nn++");
    let add = compile_str("local n = 0\nn += 1");
    assert_eq!(inc.code, add.code);
}

#[test]
fn e2e_defer_statement() {
    let proto = compile_str("local h = 1\ndefer(x) print(x) end(h)");
    let defer = find_opcode(&proto, OpCode::Defer).unwrap();
    assert_eq!(defer.b(), 1);
    assert_eq!(proto.protos.len(), 1);
    assert_eq!(proto.protos[0].num_params, 1);
}

#[test]
fn e2e_global_declaration_inside_function() {
    let src = "local count = 0\nlocal function init()\n  global count, limit = 1, 10\nend";
    let proto = compile_str(src);
    let init = &proto.protos[0];
    assert_eq!(count_opcode(init, OpCode::SetTabUp), 2);
    // The enclosing `count` local is never captured.
    assert!(!has_opcode(init, OpCode::SetUpval));
    assert_eq!(init.upvalues.len(), 1);
    assert_eq!(init.upvalues[0].name.as_deref(), Some("_ENV"));
}

#[test]
fn e2e_raise_and_check() {
    let src = "local function open(path)\n  local h = io.open(path)\n  if not h then raise 4, 'not found' end\n  check h:lock()\n  return h\nend";
    let proto = compile_str(src);
    let f = &proto.protos[0];
    // io.open, __raise, h:lock, __check; the runtime hooks keep no results.
    let results: Vec<u8> = f
        .code
        .iter()
        .filter(|i| i.opcode() == OpCode::Call)
        .map(|i| i.c())
        .collect();
    assert_eq!(results, vec![2, 1, 2, 1]);
}
