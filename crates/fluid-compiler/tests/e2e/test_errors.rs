use super::helpers::*;
use fluid_compiler::{compile, CompileError, CompileOptions, ErrorCode};

fn error_code(source: &str) -> ErrorCode {
    match compile(source.as_bytes(), &CompileOptions::default()) {
        Err(e) => e.first().map(|e| e.code).unwrap_or(ErrorCode::InvalidSyntax),
        Ok(_) => panic!("expected compile error for {source:?}"),
    }
}

#[test]
fn e2e_error_unterminated_string() {
    let err = compile_str_err("local x = \"hello");
    assert!(err.contains("unfinished string"), "{err}");
    assert_eq!(error_code("local x = \"hello"), ErrorCode::InvalidSyntax);
}

#[test]
fn e2e_error_break_outside_loop() {
    let err = compile_str_err("break");
    assert!(err.contains("break outside a loop"), "{err}");
}

#[test]
fn e2e_error_continue_outside_loop() {
    let err = compile_str_err("local function f() continue end");
    assert!(err.contains("continue outside a loop"), "{err}");
}

#[test]
fn e2e_error_malformed_number() {
    let err = compile_str_err("local x = 1e");
    assert!(err.contains("malformed number"), "{err}");
}

#[test]
fn e2e_error_invalid_escape() {
    let err = compile_str_err("local x = \"\\q\"");
    assert!(err.contains("invalid escape"), "{err}");
}

#[test]
fn e2e_error_expected_end() {
    let err = compile_str_err("if x then\n  y = 1\n");
    assert!(err.contains("to close 'if' at line 1"), "{err}");
    assert_eq!(error_code("if x then"), ErrorCode::ExpectedToken);
}

#[test]
fn e2e_error_expected_then() {
    let err = compile_str_err("if true do end");
    assert!(err.contains("expected 'then'"), "{err}");
}

#[test]
fn e2e_error_vararg_outside() {
    let err = compile_str_err("function f() return ... end");
    assert!(err.contains("cannot use '...' outside a vararg function"), "{err}");
}

#[test]
fn e2e_error_expression_not_statement() {
    let err = compile_str_err("x + 1");
    assert!(err.contains("syntax error"), "{err}");
}

#[test]
fn e2e_error_parenthesised_target() {
    let err = compile_str_err("local a\n(a) = 1");
    assert!(err.contains("cannot assign"), "{err}");
    compile_str("local a = {}\n(a).b = 1");
}

#[test]
fn e2e_error_deep_nesting() {
    let src = format!("local x = {}1{}", "(".repeat(1000), ")".repeat(1000));
    assert_eq!(error_code(&src), ErrorCode::LimitExceeded);
    let src = format!("local f = {}nil{}", "function() return ".repeat(250), " end".repeat(250));
    assert_eq!(error_code(&src), ErrorCode::LimitExceeded);
}

#[test]
fn e2e_error_malformed_assignment() {
    let err = compile_str_err("a, b");
    assert!(err.contains("malformed assignment"), "{err}");
    assert_eq!(error_code("a, b"), ErrorCode::UnexpectedToken);
}

#[test]
fn e2e_error_pipe_requires_call() {
    let err = compile_str_err("local x = a |3> 5");
    assert_eq!(err, "pipe operator requires function call on right-hand side");
    assert_eq!(error_code("local x = a |> 5"), ErrorCode::UnexpectedToken);
}

#[test]
fn e2e_error_result_filter_requires_call() {
    let err = compile_str_err("local x = [_*]t.k");
    assert!(err.contains("result filter requires a function call"), "{err}");
}

#[test]
fn e2e_error_result_filter_too_long() {
    let src = format!("local x = [{}*]f()", "_".repeat(64));
    assert_eq!(error_code(&src), ErrorCode::LimitExceeded);
}

#[test]
fn e2e_error_unknown_type_name() {
    assert_eq!(error_code("local function f(a: integer) end"), ErrorCode::UnknownTypeName);
    assert_eq!(error_code("local function f(a: 5) end"), ErrorCode::ExpectedTypeName);
}

#[test]
fn e2e_error_multiple_close_variables() {
    let err = compile_str_err("local a <close>, b <close> = x, y");
    assert!(err.contains("multiple to-be-closed variables"), "{err}");
}

#[test]
fn e2e_error_assign_to_const() {
    for src in [
        "local x <const> = 1\nx = 2",
        "local x <const> = 1\nx += 2",
        "local x <const> = 1\nx++",
        "local x <const> = 1\nlocal function f() x = 2 end",
        "local x <const> = 1\nlocal function f() return function() x ??= 2 end end",
        "local c <close> = open()\nc = nil",
    ] {
        let err = compile_str_err(src);
        assert!(err.contains("attempt to assign to const variable"), "{src:?}: {err}");
    }
    // Shadowing and field stores are fine.
    compile_str("local x <const> = {}\nx.k = 1\ndo local x = 1\nx = 2 end");
}

#[test]
fn e2e_error_reports_position() {
    let err = compile("local a = 1\nlocal = 2".as_bytes(), &CompileOptions::default()).unwrap_err();
    assert_eq!(err.diagnostics().len(), 1);
    let (line, column, _) = err.diagnostics()[0];
    assert_eq!((line, column), (2, 7));
    assert!(err.to_string().starts_with("main:2:7:"), "{err}");
}

#[test]
fn e2e_accumulate_collects_all_errors() {
    let opts = CompileOptions::default().accumulate(10);
    let src = "local = 1\nx = 2\nlocal y = = 3\nz = 4\nw = )\nv = 5";
    let err = compile(src.as_bytes(), &opts).unwrap_err();
    let CompileError::Diagnostics(diags) = &err else {
        panic!("expected diagnostics, got {err:?}");
    };
    let lines: Vec<u32> = diags.errors().map(|e| e.line()).collect();
    assert_eq!(lines, vec![1, 3, 5]);
}

#[test]
fn e2e_accumulate_stops_at_limit() {
    let opts = CompileOptions::default().accumulate(2);
    let src = "local = 1\nlocal = 2\nlocal = 3\nlocal = 4";
    let err = compile(src.as_bytes(), &opts).unwrap_err();
    assert_eq!(err.diagnostics().len(), 2);
}

#[test]
fn e2e_accumulate_warnings_do_not_fail() {
    let opts = CompileOptions::default().accumulate(10);
    let proto = compile_with("local x <frozen> = 1\nreturn x", &opts);
    assert!(!proto.code.is_empty());
}
