//! Statement parsing.
use super::AstBuilder;
use crate::ast::{
    AssignOp, Block, Expr, ExprKind, FunctionBody, FunctionPath, IfClause, LocalName, Param,
    ReturnStmt, Stmt, StmtKind,
};
use crate::error::{ErrorCode, ParseError};
use crate::token::{Span, Token};
use smol_str::SmolStr;

impl<'o> AstBuilder<'o> {
    /// Parse one statement. A bare `;` yields `None`.
    pub fn parse_statement(&mut self) -> Result<Option<Stmt>, ParseError> {
        self.nested(Self::statement)
    }

    fn statement(&mut self) -> Result<Option<Stmt>, ParseError> {
        let span = self.tokens.span();
        let stmt = match self.tokens.token() {
            Token::Semi => {
                self.advance();
                return Ok(None);
            }
            Token::Local => self.parse_local()?,
            Token::Function => self.parse_function_stmt()?,
            Token::If => self.parse_if()?,
            Token::While => self.parse_while()?,
            Token::Repeat => self.parse_repeat()?,
            Token::For => self.parse_for()?,
            Token::Do => {
                self.advance();
                let body = self.parse_block()?;
                self.expect_match(&Token::End, &Token::Do, span.line)?;
                StmtKind::Do(body)
            }
            Token::Defer => self.parse_defer()?,
            Token::Global => self.parse_global()?,
            Token::Raise => {
                self.advance();
                let code = self.parse_expression(0)?;
                let message = if self.test_next(&Token::Comma) {
                    Some(self.parse_expression(0)?)
                } else {
                    None
                };
                StmtKind::Raise { code, message }
            }
            Token::Check => {
                self.advance();
                StmtKind::Check(self.parse_expression(0)?)
            }
            Token::Return => {
                self.advance();
                StmtKind::Return(self.parse_return_values()?)
            }
            Token::Break => {
                self.advance();
                StmtKind::Break
            }
            Token::Continue => {
                self.advance();
                StmtKind::Continue
            }
            _ => return self.parse_expression_statement().map(Some),
        };
        Ok(Some(Stmt::new(stmt, span)))
    }

    fn parse_local(&mut self) -> Result<StmtKind, ParseError> {
        let local = self.advance();
        if self.test_next(&Token::Function) {
            let name = self.expect_name()?;
            let func = self.parse_function_body(local.span.line)?;
            return Ok(StmtKind::LocalFunction { name, func });
        }
        let names = self.parse_name_list()?;
        let values = if self.test_next(&Token::Assign) {
            self.parse_expression_list()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::Local { names, values })
    }

    /// `name [: type] [<attr>] {, ...}`
    fn parse_name_list(&mut self) -> Result<Vec<LocalName>, ParseError> {
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let type_name = self.parse_type_annotation()?;
            let mut has_close = false;
            let mut is_const = false;
            if self.test_next(&Token::Less) {
                let attr_tok = self.tokens.current().clone();
                let attr = self.expect_name()?;
                if !self.test_next(&Token::Greater) {
                    return Err(self.error(ErrorCode::ExpectedToken, "expected '>' after attribute"));
                }
                match attr.as_str() {
                    "close" => has_close = true,
                    "const" => is_const = true,
                    _ => self.warn(&attr_tok, format!("unknown attribute '{attr}'")),
                }
            }
            names.push(LocalName {
                name,
                type_name,
                has_close,
                is_const,
            });
            if !self.test_next(&Token::Comma) {
                return Ok(names);
            }
        }
    }

    /// `global function f() end` or `global a, b [= | ??= explist]`. Bare
    /// names left over past the value list declare further globals.
    fn parse_global(&mut self) -> Result<StmtKind, ParseError> {
        let global = self.advance();
        if self.check(&Token::Function) {
            let function = self.advance();
            let name = self.expect_name()?;
            let func = self.parse_function_body(global.span.line)?;
            return Ok(StmtKind::Global {
                op: AssignOp::Plain,
                names: vec![name],
                values: vec![Expr::new(ExprKind::Function(Box::new(func)), function.span)],
            });
        }
        let mut names = vec![self.expect_name()?];
        while self.test_next(&Token::Comma) {
            names.push(self.expect_name()?);
        }
        let op = match self.tokens.token() {
            Token::Assign => AssignOp::Plain,
            Token::IfEmptyAssign => AssignOp::IfEmpty,
            _ => {
                return Ok(StmtKind::Global {
                    op: AssignOp::Plain,
                    names,
                    values: Vec::new(),
                })
            }
        };
        self.advance();
        let mut values = self.parse_expression_list()?;
        if values.len() > names.len() {
            for extra in values.split_off(names.len()) {
                match extra.kind {
                    ExprKind::Identifier(name) => names.push(name),
                    _ => {
                        return Err(ParseError::at(
                            ErrorCode::ExpectedIdentifier,
                            extra.span,
                            "expected identifier after values in global declaration",
                        ))
                    }
                }
            }
        }
        if op == AssignOp::IfEmpty && (names.len() != 1 || values.len() != 1) {
            return Err(ParseError::at(
                ErrorCode::UnexpectedToken,
                global.span,
                "global '??=' takes a single name and a single value",
            ));
        }
        Ok(StmtKind::Global { op, names, values })
    }

    fn parse_function_stmt(&mut self) -> Result<StmtKind, ParseError> {
        let function = self.advance();
        let mut segments = vec![self.expect_name()?];
        while self.test_next(&Token::Dot) {
            segments.push(self.expect_name()?);
        }
        let method = if self.test_next(&Token::Colon) {
            Some(self.expect_name()?)
        } else {
            None
        };
        let mut func = self.parse_function_body(function.span.line)?;
        if method.is_some() {
            func.params.insert(
                0,
                Param {
                    name: SmolStr::new_inline("self"),
                    type_name: None,
                    is_self: true,
                },
            );
        }
        Ok(StmtKind::Function {
            path: FunctionPath { segments, method },
            func,
        })
    }

    /// `(params) block end`, after the `function` keyword and any name.
    pub(super) fn parse_function_body(&mut self, line: u32) -> Result<FunctionBody, ParseError> {
        let (params, is_vararg) = self.parse_parameter_list()?;
        let body = self.parse_block()?;
        let end = self.expect_match(&Token::End, &Token::Function, line)?;
        Ok(FunctionBody {
            params,
            is_vararg,
            body,
            end_span: end.span,
        })
    }

    /// `( [name [: type] {, name [: type]}] [, ...] )`
    fn parse_parameter_list(&mut self) -> Result<(Vec<Param>, bool), ParseError> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(&Token::RParen) {
            loop {
                if self.test_next(&Token::DotDotDot) {
                    is_vararg = true;
                    break;
                }
                let name = self.expect_name()?;
                let type_name = self.parse_type_annotation()?;
                params.push(Param {
                    name,
                    type_name,
                    is_self: false,
                });
                if !self.test_next(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        Ok((params, is_vararg))
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.advance().span.line;
        let mut clauses = vec![self.parse_if_clause()?];
        let mut else_block = None;
        loop {
            match self.tokens.token() {
                Token::ElseIf => {
                    self.advance();
                    clauses.push(self.parse_if_clause()?);
                }
                Token::Else => {
                    self.advance();
                    else_block = Some(self.parse_block()?);
                    break;
                }
                _ => break,
            }
        }
        self.expect_match(&Token::End, &Token::If, line)?;
        Ok(StmtKind::If {
            clauses,
            else_block,
        })
    }

    fn parse_if_clause(&mut self) -> Result<IfClause, ParseError> {
        let cond = self.parse_expression(0)?;
        self.expect(&Token::Then)?;
        let body = self.parse_block()?;
        Ok(IfClause { cond, body })
    }

    fn parse_while(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.advance().span.line;
        let cond = self.parse_expression(0)?;
        self.expect(&Token::Do)?;
        let body = self.parse_block()?;
        self.expect_match(&Token::End, &Token::While, line)?;
        Ok(StmtKind::While { cond, body })
    }

    fn parse_repeat(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.advance().span.line;
        let body = self.parse_block()?;
        self.expect_match(&Token::Until, &Token::Repeat, line)?;
        let cond = self.parse_expression(0)?;
        Ok(StmtKind::Repeat { body, cond })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.advance().span.line;
        let first = self.expect_name()?;
        if self.test_next(&Token::Assign) {
            let start = self.parse_expression(0)?;
            self.expect(&Token::Comma)?;
            let limit = self.parse_expression(0)?;
            let step = if self.test_next(&Token::Comma) {
                Some(self.parse_expression(0)?)
            } else {
                None
            };
            let body = self.parse_loop_body(line)?;
            return Ok(StmtKind::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
            });
        }
        let mut names = vec![first];
        while self.test_next(&Token::Comma) {
            names.push(self.expect_name()?);
        }
        if !self.test_next(&Token::In) {
            return Err(self.error(
                ErrorCode::ExpectedToken,
                format!("expected '=' or 'in', got '{}'", self.tokens.token()),
            ));
        }
        let exprs = self.parse_expression_list()?;
        let body = self.parse_loop_body(line)?;
        Ok(StmtKind::GenericFor { names, exprs, body })
    }

    fn parse_loop_body(&mut self, line: u32) -> Result<Block, ParseError> {
        self.expect(&Token::Do)?;
        let body = self.parse_block()?;
        self.expect_match(&Token::End, &Token::For, line)?;
        Ok(body)
    }

    /// `defer [(params)] block end [(args)]`
    fn parse_defer(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.advance().span.line;
        let (params, is_vararg) = if self.check(&Token::LParen) {
            self.parse_parameter_list()?
        } else {
            (Vec::new(), false)
        };
        let body = self.parse_block()?;
        let end = self.expect_match(&Token::End, &Token::Defer, line)?;
        // Arguments must open on the `end` line.
        let args = if self.check(&Token::LParen) && self.tokens.span().line == end.span.line {
            let open = self.advance();
            let args = if self.check(&Token::RParen) {
                Vec::new()
            } else {
                self.parse_expression_list()?
            };
            self.expect_match(&Token::RParen, &Token::LParen, open.span.line)?;
            args
        } else {
            Vec::new()
        };
        Ok(StmtKind::Defer {
            func: FunctionBody {
                params,
                is_vararg,
                body,
                end_span: end.span,
            },
            args,
        })
    }

    /// Values after `return`, plus an optional `;`.
    fn parse_return_values(&mut self) -> Result<ReturnStmt, ParseError> {
        let values = if self.tokens.token().is_block_end() || self.check(&Token::Semi) {
            Vec::new()
        } else {
            self.parse_expression_list()?
        };
        self.test_next(&Token::Semi);
        Ok(make_return(values))
    }

    /// Expression statement, assignment, or conditional shorthand.
    fn parse_expression_statement(&mut self) -> Result<Stmt, ParseError> {
        let span = self.tokens.span();
        let first = self.parse_expression(0)?;

        if let ExprKind::Presence(_) = first.kind {
            if matches!(
                self.tokens.token(),
                Token::Return | Token::Break | Token::Continue
            ) {
                return self.parse_conditional_shorthand(first, span);
            }
        }

        if !self.check(&Token::Comma) && self.assignment_op().is_none() {
            return match first.kind {
                ExprKind::Call(_)
                | ExprKind::Update { .. }
                | ExprKind::Pipe { .. }
                | ExprKind::ResultFilter(_) => Ok(Stmt::new(StmtKind::Expression(first), span)),
                _ => Err(self.error(
                    ErrorCode::UnexpectedToken,
                    format!("syntax error near '{}'", self.tokens.token()),
                )),
            };
        }

        let mut targets = vec![first];
        while self.test_next(&Token::Comma) {
            targets.push(self.parse_expression(0)?);
        }
        let op = match self.assignment_op() {
            Some(op) => {
                self.advance();
                op
            }
            None => {
                return Err(self.error(
                    ErrorCode::UnexpectedToken,
                    "malformed assignment: unexpected expression list without assignment",
                ))
            }
        };
        if op != AssignOp::Plain && targets.len() > 1 {
            return Err(ParseError::at(
                ErrorCode::UnexpectedToken,
                span,
                format!("compound assignment '{}' takes a single target", op.as_str()),
            ));
        }
        if let Some(bad) = targets.iter().find(|t| !t.is_assignable()) {
            return Err(ParseError::at(
                ErrorCode::UnexpectedToken,
                bad.span,
                "cannot assign to this expression",
            ));
        }
        let values = self.parse_expression_list()?;
        Ok(Stmt::new(
            StmtKind::Assignment {
                op,
                targets,
                values,
            },
            span,
        ))
    }

    /// `value?? return|break|continue`. A shorthand return only takes values
    /// that start on its own line.
    fn parse_conditional_shorthand(&mut self, check: Expr, span: Span) -> Result<Stmt, ParseError> {
        let condition = match check.kind {
            ExprKind::Presence(inner) => *inner,
            other => Expr::new(other, check.span),
        };
        let keyword = self.advance();
        let body = match keyword.token {
            Token::Return => {
                let next = self.tokens.current();
                let same_line = next.span.line == keyword.span.line;
                let values = if same_line
                    && !next.token.is_block_end()
                    && next.token != Token::Semi
                {
                    self.parse_expression_list()?
                } else {
                    Vec::new()
                };
                self.test_next(&Token::Semi);
                StmtKind::Return(make_return(values))
            }
            Token::Break => StmtKind::Break,
            _ => StmtKind::Continue,
        };
        Ok(Stmt::new(
            StmtKind::ConditionalShorthand {
                condition,
                body: Box::new(Stmt::new(body, keyword.span)),
            },
            span,
        ))
    }

    pub(super) fn assignment_op(&self) -> Option<AssignOp> {
        Some(match self.tokens.token() {
            Token::Assign => AssignOp::Plain,
            Token::PlusAssign => AssignOp::Add,
            Token::MinusAssign => AssignOp::Sub,
            Token::StarAssign => AssignOp::Mul,
            Token::SlashAssign => AssignOp::Div,
            Token::PercentAssign => AssignOp::Mod,
            Token::ConcatAssign => AssignOp::Concat,
            Token::IfEmptyAssign => AssignOp::IfEmpty,
            _ => return None,
        })
    }
}

pub(super) fn make_return(values: Vec<Expr>) -> ReturnStmt {
    let forwards_call = values.len() == 1 && values[0].is_call();
    ReturnStmt {
        values,
        forwards_call,
    }
}
