//! Recursive-descent AST builder: token stream → `ast::Block`.
mod expr;
mod stmt;

use crate::ast::{Block, TypeName};
use crate::config::{CompileOptions, DiagnosticMode};
use crate::error::{Diagnostics, ErrorCode, ParseError};
use crate::stream::TokenStream;
use crate::token::{SpannedToken, Token};
use smol_str::SmolStr;

/// Parser state for one chunk. Owns its token stream and diagnostics, so
/// independent chunks can be parsed concurrently by separate builders.
pub struct AstBuilder<'o> {
    tokens: TokenStream,
    options: &'o CompileOptions,
    diagnostics: Diagnostics,
    /// Set once accumulate mode has recorded `max_diagnostics` errors.
    halted: bool,
    /// Nesting of ternary true-branches; a bare `:` there may close the branch.
    ternary_depth: u32,
    /// Nested statements and sub-expressions currently being parsed.
    depth: u32,
}

/// Nesting limit for statements and sub-expressions.
pub const MAX_SYNTAX_LEVELS: u32 = 200;

impl<'o> AstBuilder<'o> {
    pub fn new(tokens: TokenStream, options: &'o CompileOptions) -> Self {
        AstBuilder {
            tokens,
            options,
            diagnostics: Diagnostics::new(options.chunk_name.clone()),
            halted: false,
            ternary_depth: 0,
            depth: 0,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    /// Parse an entire source unit.
    pub fn parse_chunk(&mut self) -> Result<Block, ParseError> {
        let mut block = self.parse_block()?;
        while !self.tokens.at_eof() {
            let start = self.tokens.position();
            let err = self.error_expected(&Token::Eof);
            self.recover(err, start)?;
            let rest = self.parse_block()?;
            block.stmts.extend(rest.stmts);
        }
        log::debug!(
            "{}: parsed {} top-level statements",
            self.options.chunk_name,
            block.stmts.len()
        );
        Ok(block)
    }

    /// Parse statements up to a block terminator (`end`, `else`, `elseif`,
    /// `until` or end of input). The terminator is not consumed.
    pub fn parse_block(&mut self) -> Result<Block, ParseError> {
        let span = self.tokens.span();
        let mut stmts = Vec::new();
        while !self.tokens.token().is_block_end() {
            let start = self.tokens.position();
            match self.parse_statement() {
                Ok(Some(stmt)) => {
                    let is_return = matches!(stmt.kind, crate::ast::StmtKind::Return(_));
                    stmts.push(stmt);
                    if is_return {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => self.recover(e, start)?,
            }
        }
        Ok(Block::new(stmts, span))
    }

    /// Fail-fast: propagate. Accumulate: record the error and skip to the
    /// next token that can begin a statement or close a block.
    fn recover(&mut self, error: ParseError, start: usize) -> Result<(), ParseError> {
        if self.options.mode == DiagnosticMode::FailFast || self.halted {
            return Err(error);
        }
        self.diagnostics.push_error(error.clone());
        if self.diagnostics.error_count() >= self.options.max_diagnostics {
            self.halted = true;
            return Err(error);
        }
        if self.tokens.position() == start {
            self.tokens.advance();
        }
        while !self.tokens.token().is_block_end() && !self.at_statement_boundary() {
            self.tokens.advance();
        }
        Ok(())
    }

    /// A statement keyword, or an expression-statement start opening a new line.
    fn at_statement_boundary(&self) -> bool {
        let token = self.tokens.token();
        if starts_statement(token) {
            return true;
        }
        let line_start = self.tokens.span().line > self.tokens.previous_line();
        line_start
            && matches!(
                token,
                Token::Name(_) | Token::LParen | Token::LBracket | Token::PlusPlus
            )
    }

    // ---- Token helpers ----

    fn check(&self, expected: &Token) -> bool {
        self.tokens.token() == expected
    }

    fn advance(&mut self) -> SpannedToken {
        self.tokens.advance()
    }

    fn test_next(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<SpannedToken, ParseError> {
        if self.check(expected) {
            Ok(self.advance())
        } else {
            Err(self.error_expected(expected))
        }
    }

    /// Expect the token closing a construct opened by `who` at `line`.
    fn expect_match(
        &mut self,
        what: &Token,
        who: &Token,
        line: u32,
    ) -> Result<SpannedToken, ParseError> {
        if self.check(what) {
            return Ok(self.advance());
        }
        if line == self.tokens.span().line {
            Err(self.error_expected(what))
        } else {
            let found = self.tokens.token().to_string();
            Err(self.error(
                ErrorCode::ExpectedToken,
                format!("expected '{what}' (to close '{who}' at line {line}), got '{found}'"),
            ))
        }
    }

    fn expect_name(&mut self) -> Result<SmolStr, ParseError> {
        match self.tokens.token() {
            Token::Name(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => {
                let msg = format!("expected name, got '{other}'");
                Err(self.error(ErrorCode::ExpectedIdentifier, msg))
            }
        }
    }

    /// Optional `: type` annotation after a parameter or local name.
    fn parse_type_annotation(&mut self) -> Result<Option<TypeName>, ParseError> {
        if !self.test_next(&Token::Colon) {
            return Ok(None);
        }
        let tok = self.tokens.current().clone();
        let text = match &tok.token {
            Token::Name(name) => name.clone(),
            Token::Function => SmolStr::new_inline("function"),
            Token::Nil => SmolStr::new_inline("nil"),
            _ => {
                return Err(ParseError::new(
                    ErrorCode::ExpectedTypeName,
                    &tok,
                    "Expected type name after ':'",
                ))
            }
        };
        self.advance();
        match TypeName::from_name(&text) {
            Some(ty) => Ok(Some(ty)),
            None => Err(ParseError::new(
                ErrorCode::UnknownTypeName,
                &tok,
                format!("Unknown type name '{text}'; expected a valid type name"),
            )),
        }
    }

    /// Run `parse` one syntax level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, ParseError>) -> Result<T, ParseError> {
        if self.depth >= MAX_SYNTAX_LEVELS {
            return Err(self.error(
                ErrorCode::LimitExceeded,
                format!("too many nested syntax levels (limit is {MAX_SYNTAX_LEVELS})"),
            ));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    // ---- Errors ----

    fn error(&self, code: ErrorCode, message: impl Into<String>) -> ParseError {
        ParseError::new(code, self.tokens.current(), message)
    }

    fn error_expected(&self, expected: &Token) -> ParseError {
        let found = self.tokens.token();
        self.error(
            ErrorCode::ExpectedToken,
            format!("expected '{expected}', got '{found}'"),
        )
    }

    fn warn(&mut self, token: &SpannedToken, message: impl Into<String>) {
        self.diagnostics
            .push_warning(ParseError::new(ErrorCode::UnexpectedToken, token, message));
    }
}

/// Tokens at which accumulate mode resumes parsing.
fn starts_statement(token: &Token) -> bool {
    matches!(
        token,
        Token::Local
            | Token::Function
            | Token::If
            | Token::While
            | Token::For
            | Token::Repeat
            | Token::Do
            | Token::Return
            | Token::Break
            | Token::Continue
            | Token::Defer
            | Token::Global
            | Token::Raise
            | Token::Check
            | Token::Semi
    )
}
