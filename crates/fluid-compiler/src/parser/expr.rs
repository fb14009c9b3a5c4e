//! Expression parsing: precedence climbing over unary and suffixed operands.
use super::stmt::make_return;
use super::AstBuilder;
use crate::ast::{
    BinaryOp, Block, CallExpr, CallTarget, Expr, ExprKind, FunctionBody, Literal, Param,
    ResultFilter, Stmt, StmtKind, TableExpr, TableField, UnaryOp, UpdateOp, UNARY_PRIORITY,
};
use crate::error::{ErrorCode, ParseError};
use crate::token::{Span, SpannedToken, Token};
use smol_str::SmolStr;

/// Pipes bind only when the enclosing minimum precedence is below this.
const PIPE_PRIORITY: u8 = 2;
const TERNARY_PRIORITY: u8 = 1;
/// Positions in a result-filter pattern, one bit each.
pub const MAX_FILTER_POSITIONS: u32 = 64;

impl<'o> AstBuilder<'o> {
    /// Parse an expression whose binary operators all bind tighter than `min_prec`.
    pub fn parse_expression(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        self.nested(|p| p.subexpression(min_prec))
    }

    fn subexpression(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op_tok = self.tokens.current().clone();
            match op_tok.token {
                Token::PipeCall(limit) => {
                    if min_prec >= PIPE_PRIORITY {
                        break;
                    }
                    self.advance();
                    let call = self.parse_unary()?;
                    if !call.is_call() {
                        return Err(ParseError::new(
                            ErrorCode::UnexpectedToken,
                            &op_tok,
                            "pipe operator requires function call on right-hand side",
                        ));
                    }
                    lhs = Expr::new(
                        ExprKind::Pipe {
                            lhs: Box::new(lhs),
                            call: Box::new(call),
                            limit,
                        },
                        op_tok.span,
                    );
                }
                Token::Question => {
                    if min_prec >= TERNARY_PRIORITY {
                        break;
                    }
                    self.advance();
                    lhs = self.parse_ternary(lhs, &op_tok)?;
                }
                _ => {
                    let Some(op) = self.binary_op() else { break };
                    let (left, right) = op.priority();
                    if left <= min_prec {
                        break;
                    }
                    self.advance();
                    let rhs = self.parse_expression(right)?;
                    lhs = Expr::new(
                        ExprKind::Binary {
                            op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        op_tok.span,
                    );
                }
            }
        }
        Ok(lhs)
    }

    /// `cond ? a :> b`, with `:` accepted in place of `:>`.
    fn parse_ternary(&mut self, cond: Expr, question: &SpannedToken) -> Result<Expr, ParseError> {
        self.ternary_depth += 1;
        let if_true = self.parse_expression(0);
        self.ternary_depth -= 1;
        let if_true = if_true?;
        if !self.test_next(&Token::TernarySep) && !self.test_next(&Token::Colon) {
            return Err(self.error(
                ErrorCode::ExpectedToken,
                format!("expected ':>' in ternary expression, got '{}'", self.tokens.token()),
            ));
        }
        let if_false = self.parse_expression(TERNARY_PRIORITY - 1)?;
        Ok(Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            },
            question.span,
        ))
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        Some(match self.tokens.token() {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::FloorDiv => BinaryOp::IDiv,
            Token::Percent => BinaryOp::Mod,
            Token::Caret => BinaryOp::Pow,
            Token::DotDot => BinaryOp::Concat,
            Token::ShiftLeft => BinaryOp::Shl,
            Token::ShiftRight => BinaryOp::Shr,
            Token::Ampersand => BinaryOp::BAnd,
            Token::Pipe => BinaryOp::BOr,
            Token::Tilde => BinaryOp::BXor,
            Token::Equal => BinaryOp::Eq,
            Token::NotEqual => BinaryOp::Ne,
            Token::Less => BinaryOp::Lt,
            Token::LessEq => BinaryOp::Le,
            Token::Greater => BinaryOp::Gt,
            Token::GreaterEq => BinaryOp::Ge,
            Token::And => BinaryOp::And,
            Token::Or => BinaryOp::Or,
            Token::DoubleQuestion if !self.tokens.should_emit_presence() => BinaryOp::IfEmpty,
            _ => return None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.tokens.current().clone();
        let op = match tok.token {
            Token::Not => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            Token::Hash => UnaryOp::Len,
            Token::Tilde => UnaryOp::BNot,
            Token::PlusPlus => {
                self.advance();
                let target = self.nested(Self::parse_unary)?;
                return self.make_update(target, false, &tok);
            }
            _ => return self.parse_suffixed(),
        };
        self.advance();
        let operand = self.parse_expression(UNARY_PRIORITY)?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            tok.span,
        ))
    }

    fn make_update(&self, target: Expr, postfix: bool, tok: &SpannedToken) -> Result<Expr, ParseError> {
        if !target.is_assignable() {
            return Err(ParseError::new(
                ErrorCode::UnexpectedToken,
                tok,
                "'++' requires a variable, field or index",
            ));
        }
        Ok(Expr::new(
            ExprKind::Update {
                op: UpdateOp::Increment,
                target: Box::new(target),
                postfix,
            },
            tok.span,
        ))
    }

    /// A primary expression followed by any suffixes.
    pub(super) fn parse_suffixed(&mut self) -> Result<Expr, ParseError> {
        let tok = self.tokens.current().clone();
        let span = tok.span;
        let literal = |lit| Ok(Expr::new(ExprKind::Literal(lit), span));
        let (primary, prefix) = match tok.token {
            Token::Name(name) => {
                self.advance();
                if self.check(&Token::Arrow) {
                    return self.parse_arrow_function(vec![name], span);
                }
                (Expr::new(ExprKind::Identifier(name), span), true)
            }
            Token::LParen if self.arrow_params_ahead() => {
                self.advance();
                let mut params = Vec::new();
                while let Token::Name(name) = self.tokens.token() {
                    params.push(name.clone());
                    self.advance();
                    if !self.test_next(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RParen)?;
                return self.parse_arrow_function(params, span);
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression(0)?;
                self.expect_match(&Token::RParen, &Token::LParen, span.line)?;
                // Parentheses only matter when they truncate multiple values.
                let expr = if inner.is_multi_value() {
                    Expr::new(ExprKind::Paren(Box::new(inner)), span)
                } else {
                    inner
                };
                if expr.is_assignable()
                    && self.check(&Token::PlusPlus)
                    && self.tokens.span().line == self.tokens.previous_line()
                {
                    let tok = self.tokens.current().clone();
                    let value = Expr::new(ExprKind::Paren(Box::new(expr)), span);
                    return self.make_update(value, true, &tok);
                }
                let before = self.tokens.position();
                let expr = self.parse_suffixes(expr, true)?;
                if self.tokens.position() == before && expr.is_assignable() {
                    // `(a)` is a value, not a storable location.
                    return Ok(Expr::new(ExprKind::Paren(Box::new(expr)), span));
                }
                return Ok(expr);
            }
            Token::Integer(i) => (self.advance_with(literal(Literal::Integer(i)))?, false),
            Token::Float(f) => (self.advance_with(literal(Literal::Float(f)))?, false),
            Token::String(bytes) => (self.advance_with(literal(Literal::String(bytes)))?, false),
            Token::Nil => (self.advance_with(literal(Literal::Nil))?, false),
            Token::True => (self.advance_with(literal(Literal::True))?, false),
            Token::False => (self.advance_with(literal(Literal::False))?, false),
            Token::DotDotDot => (self.advance_with(Ok(Expr::new(ExprKind::Vararg, span)))?, false),
            Token::Function => {
                self.advance();
                let func = self.parse_function_body(span.line)?;
                (Expr::new(ExprKind::Function(Box::new(func)), span), false)
            }
            Token::LBrace => (self.parse_table()?, false),
            Token::LBracket => return self.parse_result_filter(),
            Token::DeferOpen => {
                self.advance();
                let inner = self.parse_expression(0)?;
                if !self.test_next(&Token::DeferClose) {
                    return Err(self.error(
                        ErrorCode::ExpectedToken,
                        "Expected '}>' to close deferred expression",
                    ));
                }
                (Expr::new(ExprKind::Deferred(Box::new(inner)), span), false)
            }
            other => {
                return Err(ParseError::new(
                    ErrorCode::UnexpectedToken,
                    &SpannedToken { token: other, span },
                    format!("Expected expression, got '{}'", self.tokens.token()),
                ))
            }
        };
        self.parse_suffixes(primary, prefix)
    }

    /// `( [name {, name}] ) =>`
    fn arrow_params_ahead(&self) -> bool {
        let mut n = 1;
        while matches!(self.tokens.peek(n).token, Token::Name(_) | Token::Comma) {
            n += 1;
        }
        self.tokens.peek(n).token == Token::RParen && self.tokens.peek(n + 1).token == Token::Arrow
    }

    /// `params => expr` or `params => do ... end`, with the `=>` current.
    /// An expression body returns its value.
    fn parse_arrow_function(&mut self, params: Vec<SmolStr>, span: Span) -> Result<Expr, ParseError> {
        let arrow = self.advance();
        let (body, end_span) = if self.check(&Token::Do) {
            self.advance();
            let body = self.parse_block()?;
            let end = self.expect_match(&Token::End, &Token::Do, arrow.span.line)?;
            (body, end.span)
        } else {
            let value = self.parse_expression(0)?;
            if let Some(op) = self.assignment_op() {
                return Err(self.error(
                    ErrorCode::UnexpectedToken,
                    format!(
                        "'{}' is a statement, not an expression; use 'do ... end' for statement bodies in arrow functions",
                        op.as_str()
                    ),
                ));
            }
            let value_span = value.span;
            let ret = Stmt::new(StmtKind::Return(make_return(vec![value])), value_span);
            (Block::new(vec![ret], value_span), value_span)
        };
        let params = params
            .into_iter()
            .map(|name| Param {
                name,
                type_name: None,
                is_self: false,
            })
            .collect();
        let func = FunctionBody {
            params,
            is_vararg: false,
            body,
            end_span,
        };
        Ok(Expr::new(ExprKind::Function(Box::new(func)), span))
    }

    fn advance_with(&mut self, expr: Result<Expr, ParseError>) -> Result<Expr, ParseError> {
        self.advance();
        expr
    }

    /// Member, index, call and postfix suffixes. Literals and constructors
    /// (`prefix == false`) only take a presence check.
    fn parse_suffixes(&mut self, mut expr: Expr, prefix: bool) -> Result<Expr, ParseError> {
        loop {
            let tok = self.tokens.current().clone();
            let span = tok.span;
            match &tok.token {
                Token::Question | Token::DoubleQuestion => {
                    if !self.tokens.should_emit_presence() {
                        break;
                    }
                    self.advance();
                    return Ok(Expr::new(ExprKind::Presence(Box::new(expr)), span));
                }
                Token::PlusPlus => {
                    // `++` on a new line is a prefix increment of the next statement.
                    if span.line != self.tokens.previous_line() {
                        break;
                    }
                    self.advance();
                    return self.make_update(expr, true, &tok);
                }
                _ if !prefix => break,
                Token::Dot | Token::SafeDot => {
                    self.advance();
                    let name = self.expect_name()?;
                    expr = Expr::new(
                        ExprKind::Member {
                            table: Box::new(expr),
                            name,
                            safe: tok.token == Token::SafeDot,
                        },
                        span,
                    );
                }
                Token::LBracket | Token::SafeBracket => {
                    self.advance();
                    let key = self.parse_expression(0)?;
                    self.expect_match(&Token::RBracket, &Token::LBracket, span.line)?;
                    expr = Expr::new(
                        ExprKind::Index {
                            table: Box::new(expr),
                            key: Box::new(key),
                            safe: tok.token == Token::SafeBracket,
                        },
                        span,
                    );
                }
                Token::Colon | Token::SafeColon => {
                    // Inside a ternary, `: name` without arguments is the separator.
                    if tok.token == Token::Colon && self.ternary_depth > 0 && !self.method_call_ahead() {
                        break;
                    }
                    self.advance();
                    let name = self.expect_name()?;
                    let (args, forwards_multret) = self.parse_call_args()?;
                    expr = Expr::new(
                        ExprKind::Call(CallExpr {
                            target: CallTarget::Method {
                                receiver: Box::new(expr),
                                name,
                                safe: tok.token == Token::SafeColon,
                            },
                            args,
                            forwards_multret,
                        }),
                        span,
                    );
                }
                Token::LParen | Token::LBrace | Token::String(_) => {
                    let (args, forwards_multret) = self.parse_call_args()?;
                    expr = Expr::new(
                        ExprKind::Call(CallExpr {
                            target: CallTarget::Direct(Box::new(expr)),
                            args,
                            forwards_multret,
                        }),
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn method_call_ahead(&self) -> bool {
        matches!(self.tokens.peek(1).token, Token::Name(_))
            && matches!(
                self.tokens.peek(2).token,
                Token::LParen | Token::LBrace | Token::String(_)
            )
    }

    /// `(args)`, a table constructor, or a string literal.
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, bool), ParseError> {
        let tok = self.tokens.current().clone();
        match tok.token {
            Token::LParen => {
                self.advance();
                if self.test_next(&Token::RParen) {
                    return Ok((Vec::new(), false));
                }
                let args = self.parse_expression_list()?;
                self.expect_match(&Token::RParen, &Token::LParen, tok.span.line)?;
                let forwards = args.last().map_or(false, Expr::is_multi_value);
                Ok((args, forwards))
            }
            Token::LBrace => Ok((vec![self.parse_table()?], false)),
            Token::String(bytes) => {
                self.advance();
                let arg = Expr::new(ExprKind::Literal(Literal::String(bytes)), tok.span);
                Ok((vec![arg], false))
            }
            _ => Err(self.error(ErrorCode::ExpectedToken, "invalid call arguments")),
        }
    }

    pub(super) fn parse_expression_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut list = vec![self.parse_expression(0)?];
        while self.test_next(&Token::Comma) {
            list.push(self.parse_expression(0)?);
        }
        Ok(list)
    }

    fn parse_table(&mut self) -> Result<Expr, ParseError> {
        let open = self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();
        let mut has_array = false;
        while !self.check(&Token::RBrace) {
            let field = match self.tokens.token() {
                Token::LBracket if !self.result_filter_ahead() => {
                    let bracket = self.advance();
                    let key = self.parse_expression(0)?;
                    self.expect_match(&Token::RBracket, &Token::LBracket, bracket.span.line)?;
                    self.expect(&Token::Assign)?;
                    let value = self.parse_expression(0)?;
                    TableField::Computed { key, value }
                }
                Token::Name(name) if self.tokens.peek(1).token == Token::Assign => {
                    let name = name.clone();
                    self.advance();
                    self.advance();
                    let value = self.parse_expression(0)?;
                    TableField::Record { name, value }
                }
                _ => {
                    has_array = true;
                    TableField::Array(self.parse_expression(0)?)
                }
            };
            fields.push(field);
            if !self.test_next(&Token::Comma) && !self.test_next(&Token::Semi) {
                break;
            }
        }
        self.expect_match(&Token::RBrace, &Token::LBrace, open.span.line)?;
        Ok(Expr::new(
            ExprKind::Table(TableExpr { fields, has_array }),
            open.span,
        ))
    }

    /// Inside a constructor, `[` opens a result filter when it is followed by
    /// pattern tokens and a `]` that is not followed by `=`.
    fn result_filter_ahead(&self) -> bool {
        let mut n = 1;
        while is_pattern_token(&self.tokens.peek(n).token) {
            n += 1;
        }
        n > 1 && self.tokens.peek(n).token == Token::RBracket && self.tokens.peek(n + 1).token != Token::Assign
    }

    /// `[pattern]call`, where the pattern is a run of `_` (drop) and `*` (keep).
    fn parse_result_filter(&mut self) -> Result<Expr, ParseError> {
        let open = self.advance();
        let mut keep_mask = 0u64;
        let mut count = 0u32;
        let mut trailing_keep = false;
        let too_long = |tok: &SpannedToken| {
            ParseError::new(
                ErrorCode::LimitExceeded,
                tok,
                format!("result filter pattern too long (max {MAX_FILTER_POSITIONS} positions)"),
            )
        };
        loop {
            let tok = self.tokens.current().clone();
            match &tok.token {
                Token::Star => {
                    if count >= MAX_FILTER_POSITIONS {
                        return Err(too_long(&tok));
                    }
                    keep_mask |= 1 << count;
                    count += 1;
                    trailing_keep = true;
                }
                Token::Name(run) if is_underscore_run(run) => {
                    count += run.len() as u32;
                    if count > MAX_FILTER_POSITIONS {
                        return Err(too_long(&tok));
                    }
                    trailing_keep = false;
                }
                Token::RBracket if count > 0 => break,
                _ => {
                    return Err(self.error(
                        ErrorCode::UnexpectedToken,
                        "result filter pattern expects '_' or '*'",
                    ))
                }
            }
            self.advance();
        }
        self.advance();

        let call = self.parse_suffixed()?;
        if !call.is_call() {
            return Err(ParseError::new(
                ErrorCode::UnexpectedToken,
                &open,
                "result filter requires a function call",
            ));
        }
        let all = if count == 64 { u64::MAX } else { (1u64 << count) - 1 };
        if trailing_keep && keep_mask == all {
            return Ok(call);
        }
        Ok(Expr::new(
            ExprKind::ResultFilter(ResultFilter {
                call: Box::new(call),
                keep_mask,
                count: count as u8,
                trailing_keep,
            }),
            open.span,
        ))
    }
}

fn is_underscore_run(name: &str) -> bool {
    name.bytes().all(|b| b == b'_')
}

fn is_pattern_token(token: &Token) -> bool {
    match token {
        Token::Star => true,
        Token::Name(name) => is_underscore_run(name),
        _ => false,
    }
}
