/// Bytecode disassembler (luac -l style output).
use crate::opcode::{sc_to_int, Instruction, InstructionFormat, OpCode};
use crate::proto::{Constant, Proto};
use std::fmt::{self, Write};

/// Disassemble a complete Proto, nested functions included.
pub fn disassemble(proto: &Proto) -> String {
    Listing { proto, level: 0 }.to_string()
}

/// Render one instruction with operand annotations.
pub fn disasm_instruction(inst: &Instruction, proto: &Proto) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_instruction(&mut out, inst, proto);
    out
}

struct Listing<'a> {
    proto: &'a Proto,
    level: usize,
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = self.proto;
        let indent = "  ".repeat(self.level);
        let kind = if self.level == 0 { "main" } else { "function" };
        let vararg = if proto.is_vararg { "+" } else { "" };
        writeln!(
            f,
            "{indent}{kind} <{}:{},{}> ({} instructions)",
            proto.source,
            proto.line_defined,
            proto.last_line_defined,
            proto.code.len()
        )?;
        writeln!(
            f,
            "{indent}{}{vararg} params, {} slots, {} upvalues, {} locals, {} constants, {} functions",
            proto.num_params,
            proto.max_stack_size,
            proto.num_upvalues(),
            proto.local_vars.len(),
            proto.constants.len(),
            proto.protos.len(),
        )?;

        for (pc, inst) in proto.code.iter().enumerate() {
            let line = match proto.get_line(pc) {
                0 => "[-]".to_string(),
                n => format!("[{n}]"),
            };
            write!(f, "{indent}\t{}\t{line:>5}\t", pc + 1)?;
            write_instruction(f, inst, proto)?;
            if inst.opcode() == OpCode::Jmp {
                write!(f, "\t; to {}", pc as i64 + 2 + inst.get_sj() as i64)?;
            }
            writeln!(f)?;
        }

        if !proto.constants.is_empty() {
            writeln!(f, "{indent}constants ({}):", proto.constants.len())?;
            for (i, k) in proto.constants.iter().enumerate() {
                write!(f, "{indent}\t{i}\t")?;
                write_constant(f, k)?;
                writeln!(f)?;
            }
        }

        if !proto.local_vars.is_empty() {
            writeln!(f, "{indent}locals ({}):", proto.local_vars.len())?;
            for (i, var) in proto.local_vars.iter().enumerate() {
                writeln!(
                    f,
                    "{indent}\t{i}\t{}\t{}\t{}",
                    var.name,
                    var.start_pc + 1,
                    var.end_pc + 1
                )?;
            }
        }

        if !proto.upvalues.is_empty() {
            writeln!(f, "{indent}upvalues ({}):", proto.upvalues.len())?;
            for (i, up) in proto.upvalues.iter().enumerate() {
                let name = up.name.as_deref().unwrap_or("-");
                writeln!(f, "{indent}\t{i}\t{name}\t{}\t{}", u8::from(up.in_stack), up.index)?;
            }
        }

        for (i, p) in proto.protos.iter().enumerate() {
            writeln!(f, "{indent}function [{i}]:")?;
            write!(
                f,
                "{}",
                Listing {
                    proto: p,
                    level: self.level + 1
                }
            )?;
        }
        Ok(())
    }
}

fn write_instruction(out: &mut impl Write, inst: &Instruction, proto: &Proto) -> fmt::Result {
    let op = inst.opcode();
    write!(out, "{:<12}", op.name())?;
    match op.format() {
        InstructionFormat::IABC => {
            write!(out, "{} {} {}", inst.a(), inst.b(), inst.c())?;
            if inst.k() {
                write!(out, "k")?;
            }
            match op {
                OpCode::GetTabUp | OpCode::GetField => {
                    write_constant_note(out, proto, inst.c() as usize)?
                }
                OpCode::SetTabUp | OpCode::SetField => {
                    write_constant_note(out, proto, inst.b() as usize)?
                }
                OpCode::EqK => write_constant_note(out, proto, inst.b() as usize)?,
                OpCode::EqI | OpCode::LtI | OpCode::LeI | OpCode::GtI | OpCode::GeI => {
                    write!(out, "\t; {}", sc_to_int(inst.b()))?
                }
                OpCode::AddI | OpCode::ShrI | OpCode::ShlI => {
                    write!(out, "\t; {}", sc_to_int(inst.c()))?
                }
                _ => {}
            }
        }
        InstructionFormat::IABx => {
            write!(out, "{} {}", inst.a(), inst.bx())?;
            match op {
                OpCode::LoadK => write_constant_note(out, proto, inst.bx() as usize)?,
                OpCode::Closure => write!(out, "\t; function [{}]", inst.bx())?,
                _ => {}
            }
        }
        InstructionFormat::IAsBx => write!(out, "{} {}", inst.a(), inst.sbx())?,
        InstructionFormat::IAx => write!(out, "{}", inst.ax_field())?,
        InstructionFormat::IsJ => write!(out, "{}", inst.get_sj())?,
    }
    Ok(())
}

fn write_constant_note(out: &mut impl Write, proto: &Proto, idx: usize) -> fmt::Result {
    match proto.constants.get(idx) {
        Some(k) => {
            write!(out, "\t; ")?;
            write_constant(out, k)
        }
        None => Ok(()),
    }
}

fn write_constant(out: &mut impl Write, k: &Constant) -> fmt::Result {
    match k {
        Constant::Nil => write!(out, "nil"),
        Constant::Boolean(b) => write!(out, "{b}"),
        Constant::Integer(i) => write!(out, "{i}"),
        Constant::Float(x) => write!(out, "{x:?}"),
        Constant::String(bytes) => write!(out, "\"{}\"", String::from_utf8_lossy(bytes)),
    }
}
