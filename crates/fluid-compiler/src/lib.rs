//! Fluid compiler: lexer, AST builder, printer and register bytecode emitter.
//!
//! Fluid is Lua 5.4 plus a set of syntactic extensions (pipes, presence
//! checks, ternaries, result filters, `defer`, safe navigation and
//! compound assignment). Source goes through three stages:
//! [`stream::TokenStream`] → [`parser::AstBuilder`] → [`codegen::compile_chunk`].

pub mod ast;
pub mod codegen;
pub mod config;
pub mod disasm;
pub mod error;
pub mod lexer;
pub mod opcode;
pub mod parser;
pub mod printer;
pub mod proto;
pub mod stream;
pub mod token;

pub use ast::Block;
pub use config::{CompileOptions, DiagnosticMode};
pub use disasm::disassemble;
pub use error::{CompileError, Diagnostics, ErrorCode, ParseError};
pub use printer::print_chunk;
pub use proto::Proto;

use parser::AstBuilder;
use stream::TokenStream;

/// Parse a chunk into its AST.
///
/// Fail-fast mode reports the first error. Accumulate mode reports every
/// error recorded before parsing ended, even when the builder recovered
/// from all of them.
pub fn parse(source: &[u8], options: &CompileOptions) -> Result<Block, CompileError> {
    let tokens = TokenStream::new(source).map_err(|e| CompileError::Parse {
        chunk: options.chunk_name.clone(),
        error: e.into(),
    })?;
    let mut builder = AstBuilder::new(tokens, options);
    let result = builder.parse_chunk();
    for warning in builder.diagnostics().warnings() {
        log::warn!("{}:{}", options.chunk_name, warning);
    }
    match options.mode {
        DiagnosticMode::FailFast => result.map_err(|error| CompileError::Parse {
            chunk: options.chunk_name.clone(),
            error,
        }),
        DiagnosticMode::Accumulate => {
            let mut diagnostics = builder.into_diagnostics();
            match result {
                Ok(block) if !diagnostics.has_errors() => Ok(block),
                Ok(_) => Err(CompileError::Diagnostics(diagnostics)),
                Err(error) => {
                    if !diagnostics.errors().any(|e| *e == error) {
                        diagnostics.push_error(error);
                    }
                    Err(CompileError::Diagnostics(diagnostics))
                }
            }
        }
    }
}

/// Parse and compile a chunk into its main function.
pub fn compile(source: &[u8], options: &CompileOptions) -> Result<Proto, CompileError> {
    let block = parse(source, options)?;
    codegen::compile_chunk(&block, options).map_err(|error| CompileError::Parse {
        chunk: options.chunk_name.clone(),
        error,
    })
}
