use super::helpers::*;
use fluid_compiler::opcode::OpCode;

#[test]
fn e2e_fibonacci() {
    let src = r#"
local function fib(n)
    if n <= 1 then
        return n
    end
    return fib(n - 1) + fib(n - 2)
end
return fib(10)
"#;
    let proto = compile_str(src);
    assert!(has_opcode(&proto, OpCode::Closure));
    assert_eq!(proto.protos.len(), 1);
    let fib = &proto.protos[0];
    assert!(has_opcode(fib, OpCode::LeI));
    assert_eq!(count_opcode(fib, OpCode::Call), 2);
}

#[test]
fn e2e_counter_closure() {
    let src = r#"
local function make_counter()
    local count = 0
    return function()
        count++
        return count
    end
end
local c = make_counter()
return c()
"#;
    let proto = compile_str(src);
    let inner = &proto.protos[0].protos[0];
    assert!(has_opcode(inner, OpCode::GetUpval));
    assert!(has_opcode(inner, OpCode::SetUpval));
    assert!(has_opcode(inner, OpCode::AddI));
}

#[test]
fn e2e_nested_loops() {
    let src = r#"
for i = 1, 10 do
    for j = 1, 10 do
        local x = i
    end
end
"#;
    let proto = compile_str(src);
    assert_eq!(count_opcode(&proto, OpCode::ForPrep), 2);
    assert_eq!(count_opcode(&proto, OpCode::ForLoop), 2);
}

#[test]
fn e2e_table_operations() {
    let src = r#"
local t = {1, 2, 3}
t[4] = 4
local x = t[1]
t.name = "test"
local y = t.name
"#;
    let proto = compile_str(src);
    assert!(has_opcode(&proto, OpCode::NewTable));
    assert!(has_opcode(&proto, OpCode::SetI));
    assert!(has_opcode(&proto, OpCode::GetI));
    assert!(has_opcode(&proto, OpCode::SetField));
    assert!(has_opcode(&proto, OpCode::GetField));
}

#[test]
fn e2e_control_flow() {
    let src = r#"
local x = 10
if x then
    x = 1
else
    x = 0
end
while x do
    x = nil
end
repeat
    x = true
until x
"#;
    let proto = compile_str(src);
    assert!(has_opcode(&proto, OpCode::Test));
    assert!(has_opcode(&proto, OpCode::Jmp));
}

#[test]
fn e2e_all_return_forms() {
    let src = r#"
function f1() return end
function f2() return 1 end
function f3() return 1, 2, 3 end
function f4() return g() end
"#;
    let proto = compile_str(src);
    assert_eq!(proto.protos.len(), 4);
    assert!(has_opcode(&proto.protos[0], OpCode::Return0));
    assert!(has_opcode(&proto.protos[1], OpCode::Return1));
    assert_eq!(find_opcode(&proto.protos[2], OpCode::Return).unwrap().b(), 4);
    assert!(has_opcode(&proto.protos[3], OpCode::TailCall));
}

#[test]
fn e2e_string_operations() {
    let src = r#"
local a = "hello"
local b = "world"
local c = a .. " " .. b
return c
"#;
    let proto = compile_str(src);
    assert_eq!(find_opcode(&proto, OpCode::Concat).unwrap().b(), 3);
}

#[test]
fn e2e_varargs_program() {
    let src = r#"
local function vfunc(...)
    return ...
end
return vfunc(1, 2, 3)
"#;
    let proto = compile_str(src);
    assert!(proto.protos[0].is_vararg);
}

#[test]
fn e2e_break_nested() {
    let src = r#"
for i = 1, 10 do
    for j = 1, 10 do
        if j then
            break
        end
    end
end
"#;
    let proto = compile_str(src);
    assert_eq!(count_opcode(&proto, OpCode::ForPrep), 2);
}

#[test]
fn e2e_guard_clauses() {
    let src = r#"
local function guard(a, b)
    a?? return "missing a"
    b?? return "missing b"
    return a + b
end
return guard(1, 2)
"#;
    let proto = compile_str(src);
    let guard = &proto.protos[0];
    // Each guard tests for nil or false, then 0, then "".
    assert_eq!(count_opcode(guard, OpCode::Test), 2);
    assert_eq!(count_opcode(guard, OpCode::EqI), 2);
    assert_eq!(count_opcode(guard, OpCode::EqK), 2);
}

#[test]
fn e2e_resource_cleanup() {
    let src = r#"
local function with_file(path)
    local f <close> = open(path)
    defer() log("done") end
    return f:read()
end
"#;
    let proto = compile_str(src);
    let body = &proto.protos[0];
    assert!(has_opcode(body, OpCode::Tbc));
    assert!(has_opcode(body, OpCode::Defer));
    assert!(!has_opcode(body, OpCode::TailCall));
    assert!(has_opcode(body, OpCode::Self_));
}
