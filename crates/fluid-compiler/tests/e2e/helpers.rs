use fluid_compiler::ast::Block;
use fluid_compiler::opcode::{Instruction, OpCode};
use fluid_compiler::proto::{Constant, Proto};
use fluid_compiler::{compile, parse, CompileOptions};

/// Compile a Fluid source string with default options.
pub fn compile_str(source: &str) -> Proto {
    compile_with(source, &CompileOptions::default())
}

/// Compile a Fluid source string with the given options.
pub fn compile_with(source: &str, options: &CompileOptions) -> Proto {
    compile(source.as_bytes(), options).unwrap_or_else(|e| {
        panic!("compile failed: {e}\nsource:\n{source}");
    })
}

/// Compile a Fluid source string and expect an error; returns its message.
pub fn compile_str_err(source: &str) -> String {
    match compile(source.as_bytes(), &CompileOptions::default()) {
        Err(e) => e.first().map(|e| e.message.clone()).unwrap_or_default(),
        Ok(_) => panic!("expected compile error, got success\nsource:\n{source}"),
    }
}

/// Parse a Fluid source string with spans cleared, ready for comparison.
pub fn parse_str(source: &str) -> Block {
    let mut block = parse(source.as_bytes(), &CompileOptions::default()).unwrap_or_else(|e| {
        panic!("parse failed: {e}\nsource:\n{source}");
    });
    block.clear_spans();
    block
}

/// Check if a Proto contains a specific opcode.
pub fn has_opcode(proto: &Proto, op: OpCode) -> bool {
    proto.code.iter().any(|i| i.opcode() == op)
}

/// Count occurrences of an opcode in a Proto.
pub fn count_opcode(proto: &Proto, op: OpCode) -> usize {
    proto.code.iter().filter(|i| i.opcode() == op).count()
}

/// Find the first instruction with a given opcode.
#[allow(dead_code)]
pub fn find_opcode(proto: &Proto, op: OpCode) -> Option<Instruction> {
    proto.code.iter().copied().find(|i| i.opcode() == op)
}

/// Opcodes of a Proto in order.
#[allow(dead_code)]
pub fn opcodes(proto: &Proto) -> Vec<OpCode> {
    proto.code.iter().map(|i| i.opcode()).collect()
}

/// Get string constant value by index.
#[allow(dead_code)]
pub fn string_constant(proto: &Proto, idx: usize) -> String {
    match &proto.constants[idx] {
        Constant::String(s) => String::from_utf8(s.clone()).unwrap(),
        other => panic!("expected string constant, got {other:?}"),
    }
}

/// Whether the constant table holds the given string.
#[allow(dead_code)]
pub fn has_string_constant(proto: &Proto, s: &str) -> bool {
    proto.constants.contains(&Constant::String(s.as_bytes().to_vec()))
}
