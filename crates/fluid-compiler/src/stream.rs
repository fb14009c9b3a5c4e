/// Positioned, peekable token sequence consumed by the AST builder.
use crate::lexer::{LexError, Lexer};
use crate::token::{Span, SpannedToken, Token};

pub struct TokenStream {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl TokenStream {
    /// Scan `source` completely.
    pub fn new(source: &[u8]) -> Result<Self, LexError> {
        Ok(Self::from_tokens(Lexer::new(source).tokenize()?))
    }

    /// Wrap an already scanned token list. An `Eof` is appended if missing.
    pub fn from_tokens(mut tokens: Vec<SpannedToken>) -> Self {
        if tokens.last().map_or(true, |t| t.token != Token::Eof) {
            let span = tokens.last().map(|t| t.span).unwrap_or_default();
            tokens.push(SpannedToken {
                token: Token::Eof,
                span,
            });
        }
        TokenStream { tokens, pos: 0 }
    }

    pub fn current(&self) -> &SpannedToken {
        self.peek(0)
    }

    /// Look `n` tokens ahead; clamps to the trailing `Eof`.
    pub fn peek(&self, n: usize) -> &SpannedToken {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    pub fn token(&self) -> &Token {
        &self.current().token
    }

    pub fn span(&self) -> Span {
        self.current().span
    }

    /// Consume the current token. Never moves past `Eof`.
    pub fn advance(&mut self) -> SpannedToken {
        let tok = self.current().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    /// Line of the most recently consumed token.
    pub fn previous_line(&self) -> u32 {
        match self.pos {
            0 => self.current().span.line,
            p => self.tokens[p - 1].span.line,
        }
    }

    /// Index of the current token; only meaningful for progress checks.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn at_eof(&self) -> bool {
        *self.token() == Token::Eof
    }

    /// Whether a `?`/`??` at the cursor is a postfix presence check rather
    /// than the start of a ternary or if-empty operator: true when the
    /// operator starts a later line than the operand before it, or the token
    /// after it cannot begin an expression.
    pub fn should_emit_presence(&self) -> bool {
        let op = self.current();
        if !matches!(op.token, Token::Question | Token::DoubleQuestion) {
            return false;
        }
        op.span.line > self.previous_line() || !self.peek(1).token.starts_expression()
    }
}
