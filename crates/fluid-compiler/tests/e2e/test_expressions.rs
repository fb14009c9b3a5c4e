use super::helpers::*;
use fluid_compiler::opcode::OpCode;
use fluid_compiler::proto::Constant;
use fluid_compiler::CompileOptions;

#[test]
fn e2e_return_nil() {
    let proto = compile_str("return nil");
    assert!(has_opcode(&proto, OpCode::LoadNil));
    assert!(has_opcode(&proto, OpCode::Return1));
}

#[test]
fn e2e_return_booleans() {
    assert!(has_opcode(&compile_str("return true"), OpCode::LoadTrue));
    assert!(has_opcode(&compile_str("return false"), OpCode::LoadFalse));
}

#[test]
fn e2e_return_integer() {
    let proto = compile_str("return 42");
    let load = find_opcode(&proto, OpCode::LoadI).unwrap();
    assert_eq!(load.sbx(), 42);
}

#[test]
fn e2e_return_large_integer_uses_constant() {
    let proto = compile_str("return 1 << 40");
    assert!(has_opcode(&proto, OpCode::LoadK));
    assert!(proto.constants.contains(&Constant::Integer(1 << 40)));
}

#[test]
fn e2e_return_float() {
    let proto = compile_str("return 3.14");
    assert!(has_opcode(&proto, OpCode::LoadK));
    assert_eq!(proto.constants[0], Constant::Float(3.14));
}

#[test]
fn e2e_return_string() {
    let proto = compile_str("return \"hello world\"");
    assert!(has_opcode(&proto, OpCode::LoadK));
    assert_eq!(string_constant(&proto, 0), "hello world");
}

#[test]
fn e2e_constant_folding_neg() {
    let proto = compile_str("return -42");
    assert_eq!(find_opcode(&proto, OpCode::LoadI).unwrap().sbx(), -42);
    assert!(!has_opcode(&proto, OpCode::Unm));
}

#[test]
fn e2e_constant_folding_not() {
    let proto = compile_str("return not nil");
    assert!(has_opcode(&proto, OpCode::LoadTrue));
    assert!(!has_opcode(&proto, OpCode::Not));
}

#[test]
fn e2e_constant_folding_bnot() {
    let proto = compile_str("return ~0");
    assert_eq!(find_opcode(&proto, OpCode::LoadI).unwrap().sbx(), -1);
    assert!(!has_opcode(&proto, OpCode::BNot));
}

#[test]
fn e2e_constant_folding_arithmetic() {
    let proto = compile_str("return 2 + 3 * 4");
    assert_eq!(find_opcode(&proto, OpCode::LoadI).unwrap().sbx(), 14);
    assert!(!has_opcode(&proto, OpCode::Add));
    assert!(!has_opcode(&proto, OpCode::Mul));

    let proto = compile_str("return 2^10");
    assert_eq!(find_opcode(&proto, OpCode::LoadF).unwrap().sbx(), 1024);
}

#[test]
fn e2e_constant_folding_can_be_disabled() {
    let opts = CompileOptions::default().with_constant_folding(false);
    let proto = compile_with("return 2 + 3", &opts);
    assert!(has_opcode(&proto, OpCode::AddI) || has_opcode(&proto, OpCode::Add));
}

#[test]
fn e2e_division_by_zero_not_folded() {
    let proto = compile_str("return 1 // 0");
    assert!(has_opcode(&proto, OpCode::IDiv) || has_opcode(&proto, OpCode::IDivK));
}

#[test]
fn e2e_arithmetic_ops() {
    let proto = compile_str("local a = 1\nlocal b = 2\nreturn a + b");
    assert!(has_opcode(&proto, OpCode::Add));
    assert!(has_opcode(&proto, OpCode::MmBin));
}

#[test]
fn e2e_arithmetic_immediate_and_constant() {
    let proto = compile_str("local a = 1\nreturn a + 5, a * 2.5");
    assert!(has_opcode(&proto, OpCode::AddI));
    assert!(has_opcode(&proto, OpCode::MmBinI));
    assert!(has_opcode(&proto, OpCode::MulK));
    assert!(has_opcode(&proto, OpCode::MmBinK));
}

#[test]
fn e2e_bitwise_ops_are_native() {
    let proto = compile_str("local a, b = 1, 2\nreturn a & b, a | b, a ~ b, a << b, a >> b");
    for op in [OpCode::BAnd, OpCode::BOr, OpCode::BXor, OpCode::Shl, OpCode::Shr] {
        assert!(has_opcode(&proto, op), "missing {op:?}");
    }
}

#[test]
fn e2e_comparison_ops() {
    let proto = compile_str("local a = 1\nlocal b = 2\nif a < b then end");
    assert!(has_opcode(&proto, OpCode::Lt));
    let proto = compile_str("local a = 1\nif a == 3 then end");
    assert!(has_opcode(&proto, OpCode::EqI));
}

#[test]
fn e2e_not_equal_alias() {
    assert_eq!(parse_str("return a != b"), parse_str("return a ~= b"));
}

#[test]
fn e2e_and_short_circuit() {
    let proto = compile_str("local a, b\nreturn a and b");
    assert!(has_opcode(&proto, OpCode::TestSet));
    assert!(has_opcode(&proto, OpCode::Jmp));
}

#[test]
fn e2e_or_short_circuit() {
    let proto = compile_str("local a, b\nreturn a or b");
    assert!(has_opcode(&proto, OpCode::TestSet));
}

#[test]
fn e2e_constant_and_needs_no_test() {
    let proto = compile_str("return true and 42");
    assert!(!has_opcode(&proto, OpCode::TestSet));
    assert_eq!(find_opcode(&proto, OpCode::LoadI).unwrap().sbx(), 42);
}

#[test]
fn e2e_table_constructor_empty() {
    let proto = compile_str("return {}");
    assert!(has_opcode(&proto, OpCode::NewTable));
    assert!(!has_opcode(&proto, OpCode::SetList));
}

#[test]
fn e2e_table_constructor_array() {
    let proto = compile_str("return {1, 2, 3}");
    assert!(has_opcode(&proto, OpCode::NewTable));
    let setlist = find_opcode(&proto, OpCode::SetList).unwrap();
    assert_eq!(setlist.b(), 3);
}

#[test]
fn e2e_table_constructor_hash() {
    let proto = compile_str("return {x = 1, y = 2}");
    assert_eq!(count_opcode(&proto, OpCode::SetField), 2);
}

#[test]
fn e2e_table_constructor_mixed() {
    let proto = compile_str("return {1, x = 2, 3}");
    assert!(has_opcode(&proto, OpCode::SetField));
    assert!(has_opcode(&proto, OpCode::SetList));
}

#[test]
fn e2e_table_bracket_key() {
    let proto = compile_str("return {[1] = \"a\", [2] = \"b\"}");
    assert_eq!(count_opcode(&proto, OpCode::SetI), 2);
}

#[test]
fn e2e_concat() {
    let proto = compile_str("local a = \"hello\"\nlocal b = \"world\"\nreturn a .. b");
    assert!(has_opcode(&proto, OpCode::Concat));
}

#[test]
fn e2e_concat_chain_is_one_instruction() {
    let proto = compile_str("local a, b, c\nreturn a .. b .. c");
    let concat = find_opcode(&proto, OpCode::Concat).unwrap();
    assert_eq!(count_opcode(&proto, OpCode::Concat), 1);
    assert_eq!(concat.b(), 3);
}

#[test]
fn e2e_len_operator() {
    let proto = compile_str("local t = {}\nreturn #t");
    assert!(has_opcode(&proto, OpCode::Len));
}

#[test]
fn e2e_multiple_return_values() {
    let proto = compile_str("return 1, 2, 3");
    let ret = find_opcode(&proto, OpCode::Return).unwrap();
    assert_eq!(ret.b(), 4);
}

#[test]
fn e2e_vararg_in_main_chunk() {
    let proto = compile_str("return ...");
    let vararg = find_opcode(&proto, OpCode::VarArg).unwrap();
    assert_eq!(vararg.c(), 0);
}
