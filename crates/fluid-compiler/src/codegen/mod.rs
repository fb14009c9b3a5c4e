//! Bytecode emitter: walks the AST and produces a `Proto` per function.
//!
//! Expressions are compiled into `ExpDesc` descriptors that are discharged
//! into registers only when a consumer needs them; statements run inside a
//! `RegisterScope` so their temporaries are released on exit.
mod assign;
mod call;
pub mod expdesc;
mod expr;
pub mod func_state;
mod jumps;
pub mod operator;
pub mod regalloc;
mod stmt;

use crate::ast::{Block, FunctionBody};
use crate::config::CompileOptions;
use crate::error::{ErrorCode, ParseError};
use crate::opcode::OpCode;
use crate::proto::{Proto, UpvalKind};
use crate::token::Span;
use expdesc::{ExpDesc, ExpKind};
use func_state::{FuncState, VarKind, VarName};
use smol_str::SmolStr;

/// Name of the upvalue holding the global environment.
const ENV: &str = "_ENV";

pub struct Compiler<'o> {
    /// Function being compiled.
    fs: FuncState,
    /// Enclosing functions, outermost first.
    enclosing: Vec<FuncState>,
    options: &'o CompileOptions,
}

/// Compile a parsed chunk into its main function.
pub fn compile_chunk(block: &Block, options: &CompileOptions) -> Result<Proto, ParseError> {
    let mut compiler = Compiler::new(options);
    compiler.main_function(block)
}

impl<'o> Compiler<'o> {
    pub fn new(options: &'o CompileOptions) -> Self {
        Compiler {
            fs: FuncState::new(options, 0),
            enclosing: Vec::new(),
            options,
        }
    }

    fn main_function(&mut self, block: &Block) -> Result<Proto, ParseError> {
        self.fs.set_span(block.span);
        self.fs.enter_block(false);
        self.fs.proto.is_vararg = true;
        self.fs.emit_abc(OpCode::VarArgPrep, 0, 0, 0);
        self.fs
            .new_upvalue(SmolStr::new_inline(ENV), true, 0, UpvalKind::Regular)?;
        self.block_statements(block)?;
        self.finish_function()?;
        let fs = std::mem::replace(&mut self.fs, FuncState::new(self.options, 0));
        let proto = fs.into_proto();
        log::debug!(
            "{}: compiled main chunk ({} instructions, {} constants, {} functions)",
            self.options.chunk_name,
            proto.code.len(),
            proto.constants.len(),
            proto.protos.len()
        );
        Ok(proto)
    }

    /// Final return, outer block and code fix-ups of the current function.
    fn finish_function(&mut self) -> Result<(), ParseError> {
        let first = self.fs.nvarstack();
        self.fs.ret(first, 0);
        self.fs.leave_block()?;
        self.fs.finish()
    }

    // ---- Function nesting ----

    fn open_function(&mut self, span: Span) {
        let child = FuncState::new(self.options, span.line);
        let parent = std::mem::replace(&mut self.fs, child);
        self.enclosing.push(parent);
        self.fs.set_span(span);
        self.fs.enter_block(false);
        log::debug!(
            "open function at line {} (depth {})",
            span.line,
            self.enclosing.len()
        );
    }

    /// Finish the current function and load it as a closure into the next
    /// register of the enclosing one.
    fn close_function(&mut self, end: Span, start: Span) -> Result<ExpDesc, ParseError> {
        self.fs.set_span(end);
        self.finish_function()?;
        self.fs.proto.last_line_defined = end.line;
        let Some(parent) = self.enclosing.pop() else {
            return Err(self.fs.error(ErrorCode::InvalidSyntax, "no enclosing function"));
        };
        let child = std::mem::replace(&mut self.fs, parent);
        let proto = child.into_proto();
        log::debug!(
            "close function <{}:{},{}> ({} instructions, {} upvalues)",
            proto.source,
            proto.line_defined,
            proto.last_line_defined,
            proto.code.len(),
            proto.num_upvalues()
        );
        self.fs.proto.protos.push(proto);
        let index = (self.fs.proto.protos.len() - 1) as u32;
        self.fs.set_span(start);
        let pc = self.fs.emit_abx(OpCode::Closure, 0, index);
        let mut e = ExpDesc::new(ExpKind::Reloc(pc));
        self.fs.exp_to_next_reg(&mut e)?;
        Ok(e)
    }

    /// Compile a function literal into a closure in the next register.
    fn function_body(&mut self, func: &FunctionBody, span: Span) -> Result<ExpDesc, ParseError> {
        self.open_function(span);
        let params = func
            .params
            .iter()
            .map(|p| (VarName::Named(p.name.clone()), VarKind::Regular));
        self.fs.activate_locals(params)?;
        let nparams = self.fs.nvarstack();
        self.fs.proto.num_params = nparams;
        if func.is_vararg {
            self.fs.proto.is_vararg = true;
            self.fs.emit_abc(OpCode::VarArgPrep, nparams, 0, 0);
        }
        self.fs.reserve_regs(nparams)?;
        self.block_statements(&func.body)?;
        self.close_function(func.end_span, span)
    }

    // ---- Name resolution ----

    /// The function at nesting `level`; `enclosing.len()` is the current one.
    fn func_at(&mut self, level: usize) -> &mut FuncState {
        match self.enclosing.get_mut(level) {
            Some(fs) => fs,
            None => &mut self.fs,
        }
    }

    /// Find `name` as a local or upvalue of the function at `level`,
    /// creating upvalues along the way. None for globals.
    fn resolve_at(&mut self, level: usize, name: &SmolStr, base: bool) -> Result<Option<ExpKind>, ParseError> {
        let fs = self.func_at(level);
        if let Some(reg) = fs.search_var(name) {
            if !base {
                fs.mark_upval(reg);
            }
            return Ok(Some(ExpKind::Local(reg)));
        }
        if let Some(idx) = fs.search_upvalue(name) {
            return Ok(Some(ExpKind::Upval(idx)));
        }
        if level == 0 {
            return Ok(None);
        }
        let outer = match self.resolve_at(level - 1, name, false)? {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let parent = self.func_at(level - 1);
        let (in_stack, index, kind) = match outer {
            ExpKind::Local(reg) => {
                let kind = match parent.var_kind(reg) {
                    Some(VarKind::ToBeClosed) => UpvalKind::ToBeClosed,
                    Some(VarKind::Const) => UpvalKind::Const,
                    _ => UpvalKind::Regular,
                };
                (true, reg, kind)
            }
            ExpKind::Upval(idx) => {
                let kind = parent
                    .upvalues
                    .get(idx as usize)
                    .map_or(UpvalKind::Regular, |u| u.kind);
                (false, idx, kind)
            }
            _ => return Ok(None),
        };
        let idx = self
            .func_at(level)
            .new_upvalue(name.clone(), in_stack, index, kind)?;
        Ok(Some(ExpKind::Upval(idx)))
    }

    /// Descriptor for a name: local, upvalue, or `_ENV[name]`.
    fn single_var(&mut self, name: &SmolStr) -> Result<ExpDesc, ParseError> {
        let level = self.enclosing.len();
        if let Some(kind) = self.resolve_at(level, name, true)? {
            return Ok(ExpDesc::new(kind));
        }
        self.global_var(name)
    }

    /// `_ENV[name]`, ignoring any local or upvalue called `name`.
    fn global_var(&mut self, name: &str) -> Result<ExpDesc, ParseError> {
        let level = self.enclosing.len();
        let env_name = SmolStr::new_inline(ENV);
        let env = self.resolve_at(level, &env_name, true)?.ok_or_else(|| {
            self.fs
                .error(ErrorCode::InvalidSyntax, "global environment is not accessible")
        })?;
        let mut var = ExpDesc::new(env);
        self.fs.exp_to_any_reg_up(&mut var)?;
        let key = ExpDesc::new(ExpKind::Str(name.as_bytes().to_vec()));
        self.fs.indexed(&mut var, key)?;
        Ok(var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::parser::tests::parse;

    fn compile(src: &str) -> Proto {
        compile_chunk(&parse(src), &CompileOptions::default()).unwrap()
    }

    #[test]
    fn test_main_function_shape() {
        let p = compile("");
        assert!(p.is_vararg);
        assert_eq!(p.code[0].opcode(), OpCode::VarArgPrep);
        assert_eq!(p.code.last().map(|i| i.opcode()), Some(OpCode::Return));
        assert_eq!(p.upvalues[0].name.as_deref(), Some("_ENV"));
    }

    #[test]
    fn test_global_goes_through_env() {
        let p = compile("x = y");
        assert!(p.code.iter().any(|i| i.opcode() == OpCode::GetTabUp));
        assert!(p.code.iter().any(|i| i.opcode() == OpCode::SetTabUp));
    }

    #[test]
    fn test_nested_upvalues() {
        let p = compile("local a = 1\nlocal function f() return function() return a end end");
        let f = &p.protos[0];
        let g = &f.protos[0];
        assert!(f.upvalues[0].in_stack);
        assert_eq!(f.upvalues[0].name.as_deref(), Some("a"));
        assert!(!g.upvalues[0].in_stack);
        assert_eq!(g.upvalues[0].index, 0);
    }

    #[test]
    fn test_function_lines() {
        let p = compile("local f = function()\n\nend");
        assert_eq!(p.protos[0].line_defined, 1);
        assert_eq!(p.protos[0].last_line_defined, 3);
    }
}
