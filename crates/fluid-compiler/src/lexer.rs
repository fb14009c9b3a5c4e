use crate::token::{Span, SpannedToken, Token};
use smol_str::SmolStr;
use thiserror::Error;

/// Lexer error.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{line}:{column}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Pull-based lexer for Fluid source.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer from source bytes.
    pub fn new(source: &'a [u8]) -> Self {
        let mut lexer = Lexer {
            source,
            pos: 0,
            line: 1,
            column: 1,
        };
        lexer.skip_shebang();
        lexer
    }

    /// Scan the whole input. The returned vector always ends with `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<SpannedToken>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = tok.token == Token::Eof;
            tokens.push(tok);
            if done {
                return Ok(tokens);
            }
        }
    }

    /// Scan the next token.
    pub fn next_token(&mut self) -> Result<SpannedToken, LexError> {
        self.skip_whitespace_and_comments()?;
        let span = Span::new(self.line, self.column, self.pos as u32);
        let token = self.scan_token(span)?;
        Ok(SpannedToken { token, span })
    }

    /// Get current line number.
    pub fn line(&self) -> u32 {
        self.line
    }

    // ---- Internal scanning ----

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance_char(&mut self) -> Option<u8> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        match ch {
            b'\n' | b'\r' => {
                // \r\n and \n\r count as one newline
                let other = if ch == b'\n' { b'\r' } else { b'\n' };
                if self.peek() == Some(other) {
                    self.pos += 1;
                }
                self.line += 1;
                self.column = 1;
            }
            _ => self.column += 1,
        }
        Some(ch)
    }

    /// Consume `n` plain characters.
    fn bump(&mut self, n: usize) {
        for _ in 0..n {
            self.advance_char();
        }
    }

    fn error(&self, span: Span, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }

    fn skip_shebang(&mut self) {
        if self.source.starts_with(b"#") {
            while let Some(ch) = self.peek() {
                if ch == b'\n' || ch == b'\r' {
                    break;
                }
                self.advance_char();
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while matches!(
                self.peek(),
                Some(b' ' | b'\t' | b'\n' | b'\r' | b'\x0B' | b'\x0C')
            ) {
                self.advance_char();
            }

            if self.peek() == Some(b'-') && self.peek_at(1) == Some(b'-') {
                self.bump(2);
                if let Some(level) = self.check_long_bracket() {
                    let span = Span::new(self.line, self.column, self.pos as u32);
                    self.bump(level + 2);
                    self.scan_long_string_content(level, span)?;
                    continue;
                }
                while let Some(ch) = self.peek() {
                    if ch == b'\n' || ch == b'\r' {
                        break;
                    }
                    self.advance_char();
                }
                continue;
            }
            return Ok(());
        }
    }

    /// Check if current position starts a long bracket `[=*[`. Returns the level if so.
    fn check_long_bracket(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(level + 1) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(level + 1) == Some(b'[')).then_some(level)
    }

    fn scan_token(&mut self, span: Span) -> Result<Token, LexError> {
        let Some(ch) = self.peek() else {
            return Ok(Token::Eof);
        };
        let next = self.peek_at(1);

        let (token, width) = match ch {
            b'+' => match next {
                Some(b'+') => (Token::PlusPlus, 2),
                Some(b'=') => (Token::PlusAssign, 2),
                _ => (Token::Plus, 1),
            },
            b'-' => match next {
                Some(b'=') => (Token::MinusAssign, 2),
                _ => (Token::Minus, 1),
            },
            b'*' => match next {
                Some(b'=') => (Token::StarAssign, 2),
                _ => (Token::Star, 1),
            },
            b'/' => match next {
                Some(b'/') => (Token::FloorDiv, 2),
                Some(b'=') => (Token::SlashAssign, 2),
                _ => (Token::Slash, 1),
            },
            b'%' => match next {
                Some(b'=') => (Token::PercentAssign, 2),
                _ => (Token::Percent, 1),
            },
            b'^' => (Token::Caret, 1),
            b'#' => (Token::Hash, 1),
            b'&' => (Token::Ampersand, 1),
            b'|' => return self.scan_pipe(span),
            b'(' => (Token::LParen, 1),
            b')' => (Token::RParen, 1),
            b'{' => (Token::LBrace, 1),
            b'}' => match next {
                Some(b'>') => (Token::DeferClose, 2),
                _ => (Token::RBrace, 1),
            },
            b']' => (Token::RBracket, 1),
            b';' => (Token::Semi, 1),
            b',' => (Token::Comma, 1),
            b'~' => match next {
                Some(b'=') => (Token::NotEqual, 2),
                _ => (Token::Tilde, 1),
            },
            b'!' => match next {
                Some(b'=') => (Token::NotEqual, 2),
                _ => return Err(self.error(span, "unexpected symbol near '!'")),
            },
            b'=' => match next {
                Some(b'=') => (Token::Equal, 2),
                Some(b'>') => (Token::Arrow, 2),
                _ => (Token::Assign, 1),
            },
            b'<' => match next {
                Some(b'<') => (Token::ShiftLeft, 2),
                Some(b'=') => (Token::LessEq, 2),
                Some(b'{') => (Token::DeferOpen, 2),
                _ => (Token::Less, 1),
            },
            b'>' => match next {
                Some(b'>') => (Token::ShiftRight, 2),
                Some(b'=') => (Token::GreaterEq, 2),
                _ => (Token::Greater, 1),
            },
            b':' => match next {
                Some(b':') => (Token::DoubleColon, 2),
                Some(b'>') => (Token::TernarySep, 2),
                _ => (Token::Colon, 1),
            },
            b'?' => match (next, self.peek_at(2)) {
                (Some(b'?'), Some(b'=')) => (Token::IfEmptyAssign, 3),
                (Some(b'?'), _) => (Token::DoubleQuestion, 2),
                (Some(b'.'), _) => (Token::SafeDot, 2),
                (Some(b'['), _) => (Token::SafeBracket, 2),
                (Some(b':'), _) => (Token::SafeColon, 2),
                _ => (Token::Question, 1),
            },
            b'.' => match (next, self.peek_at(2)) {
                (Some(b'.'), Some(b'.')) => (Token::DotDotDot, 3),
                (Some(b'.'), Some(b'=')) => (Token::ConcatAssign, 3),
                (Some(b'.'), _) => (Token::DotDot, 2),
                (Some(d), _) if d.is_ascii_digit() => return self.scan_number(span),
                _ => (Token::Dot, 1),
            },
            b'[' => match self.check_long_bracket() {
                Some(level) => {
                    self.bump(level + 2);
                    let content = self.scan_long_string_content(level, span)?;
                    return Ok(Token::String(content));
                }
                None => (Token::LBracket, 1),
            },
            b'"' | b'\'' => return self.scan_short_string(span),
            b'0'..=b'9' => return self.scan_number(span),
            _ if is_ident_start(ch) => return Ok(self.scan_name()),
            _ => {
                let near = if ch.is_ascii_graphic() {
                    format!("'{}'", ch as char)
                } else {
                    format!("'<\\{ch}>'")
                };
                return Err(self.error(span, format!("unexpected symbol near {near}")));
            }
        };
        self.bump(width);
        Ok(token)
    }

    /// `|`, `|>` or `|N>`.
    fn scan_pipe(&mut self, span: Span) -> Result<Token, LexError> {
        self.advance_char();
        if self.peek() == Some(b'>') {
            self.advance_char();
            return Ok(Token::PipeCall(0));
        }
        let mut digits = 0;
        while self.peek_at(digits).is_some_and(|c| c.is_ascii_digit()) {
            digits += 1;
        }
        if digits == 0 || self.peek_at(digits) != Some(b'>') {
            return Ok(Token::Pipe);
        }
        let text = &self.source[self.pos..self.pos + digits];
        let limit = std::str::from_utf8(text)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| (1..=255).contains(n))
            .ok_or_else(|| {
                self.error(
                    span,
                    format!(
                        "invalid pipe result limit '{}'",
                        String::from_utf8_lossy(text)
                    ),
                )
            })?;
        self.bump(digits + 1);
        Ok(Token::PipeCall(limit))
    }

    fn scan_name(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.advance_char();
        }
        // Identifiers are ASCII by construction.
        let name = String::from_utf8_lossy(&self.source[start..self.pos]);
        Token::keyword_from_str(&name).unwrap_or_else(|| Token::Name(SmolStr::new(name)))
    }

    fn scan_digits(&mut self, hex: bool) -> usize {
        let mut n = 0;
        while self
            .peek()
            .is_some_and(|c| if hex { c.is_ascii_hexdigit() } else { c.is_ascii_digit() })
        {
            self.advance_char();
            n += 1;
        }
        n
    }

    fn scan_exponent(&mut self, span: Span) -> Result<(), LexError> {
        if matches!(self.peek(), Some(b'+' | b'-')) {
            self.advance_char();
        }
        if self.scan_digits(false) == 0 {
            return Err(self.error(span, "malformed number: expected exponent digits"));
        }
        Ok(())
    }

    fn scan_number(&mut self, span: Span) -> Result<Token, LexError> {
        let start = self.pos;
        let hex = self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X'));
        let mut is_float = false;

        if hex {
            self.bump(2);
        }
        let int_digits = self.scan_digits(hex);
        let mut frac_digits = 0;
        if self.peek() == Some(b'.') && self.peek_at(1) != Some(b'.') {
            is_float = true;
            self.advance_char();
            frac_digits = self.scan_digits(hex);
        }
        if int_digits + frac_digits == 0 {
            return Err(self.error(span, "malformed number near '0x'"));
        }
        match (hex, self.peek()) {
            (false, Some(b'e' | b'E')) | (true, Some(b'p' | b'P')) => {
                is_float = true;
                self.advance_char();
                self.scan_exponent(span)?;
            }
            _ => {}
        }

        if self.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == b'_') {
            while self
                .peek()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'.')
            {
                self.advance_char();
            }
            let text = String::from_utf8_lossy(&self.source[start..self.pos]);
            return Err(self.error(span, format!("malformed number near '{text}'")));
        }

        let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        let malformed = || format!("malformed number near '{text}'");
        if hex {
            if is_float {
                return parse_hex_float(&text[2..])
                    .map(Token::Float)
                    .ok_or_else(|| self.error(span, malformed()));
            }
            // Hex integers wrap on overflow.
            let value = text[2..].bytes().fold(0u64, |acc, c| {
                acc.wrapping_mul(16).wrapping_add(hex_value(c) as u64)
            });
            return Ok(Token::Integer(value as i64));
        }
        if !is_float {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Token::Integer(i));
            }
        }
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| self.error(span, malformed()))
    }

    fn scan_short_string(&mut self, span: Span) -> Result<Token, LexError> {
        let quote = self.peek();
        self.advance_char();
        let mut buf = Vec::new();

        loop {
            match self.peek() {
                None => return Err(self.error(span, "unfinished string near <eof>")),
                Some(b'\n' | b'\r') => return Err(self.error(span, "unfinished string")),
                Some(ch) if Some(ch) == quote => {
                    self.advance_char();
                    return Ok(Token::String(buf));
                }
                Some(b'\\') => {
                    self.advance_char();
                    self.scan_escape(span, &mut buf)?;
                }
                Some(ch) => {
                    self.advance_char();
                    buf.push(ch);
                }
            }
        }
    }

    fn scan_escape(&mut self, span: Span, buf: &mut Vec<u8>) -> Result<(), LexError> {
        let invalid = |lexer: &Self| lexer.error(span, "invalid escape sequence");
        let Some(ch) = self.peek() else {
            return Err(self.error(span, "unfinished string near <eof>"));
        };
        let simple = match ch {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0C),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0B),
            b'\\' | b'"' | b'\'' => Some(ch),
            b'\n' | b'\r' => Some(b'\n'),
            _ => None,
        };
        if let Some(byte) = simple {
            self.advance_char();
            buf.push(byte);
            return Ok(());
        }

        match ch {
            b'x' => {
                self.advance_char();
                let mut value = 0u8;
                for _ in 0..2 {
                    match self.peek() {
                        Some(h) if h.is_ascii_hexdigit() => {
                            self.advance_char();
                            value = (value << 4) | hex_value(h);
                        }
                        _ => return Err(invalid(self)),
                    }
                }
                buf.push(value);
            }
            b'u' => {
                self.advance_char();
                if self.peek() != Some(b'{') {
                    return Err(invalid(self));
                }
                self.advance_char();
                let mut code: u32 = 0;
                let mut count = 0;
                loop {
                    match self.peek() {
                        Some(b'}') if count > 0 => {
                            self.advance_char();
                            break;
                        }
                        Some(h) if h.is_ascii_hexdigit() => {
                            self.advance_char();
                            code = code
                                .checked_mul(16)
                                .map(|c| c + hex_value(h) as u32)
                                .filter(|c| *c <= 0x7FFF_FFFF)
                                .ok_or_else(|| self.error(span, "UTF-8 value too large"))?;
                            count += 1;
                        }
                        _ => return Err(invalid(self)),
                    }
                }
                encode_utf8(code, buf);
            }
            b'z' => {
                self.advance_char();
                while matches!(
                    self.peek(),
                    Some(b' ' | b'\t' | b'\n' | b'\r' | b'\x0B' | b'\x0C')
                ) {
                    self.advance_char();
                }
            }
            b'0'..=b'9' => {
                let mut value: u32 = 0;
                for _ in 0..3 {
                    match self.peek() {
                        Some(d) if d.is_ascii_digit() => {
                            self.advance_char();
                            value = value * 10 + (d - b'0') as u32;
                        }
                        _ => break,
                    }
                }
                let byte = u8::try_from(value)
                    .map_err(|_| self.error(span, "decimal escape too large"))?;
                buf.push(byte);
            }
            _ => return Err(invalid(self)),
        }
        Ok(())
    }

    /// Scan the body of a long string or comment; the opening bracket is consumed.
    fn scan_long_string_content(&mut self, level: usize, span: Span) -> Result<Vec<u8>, LexError> {
        let mut buf = Vec::new();
        // A newline right after the opening bracket is skipped.
        if matches!(self.peek(), Some(b'\n' | b'\r')) {
            self.advance_char();
        }
        loop {
            match self.peek() {
                None => return Err(self.error(span, "unfinished long string near <eof>")),
                Some(b']') if self.check_closing_long_bracket(level) => {
                    self.bump(level + 2);
                    return Ok(buf);
                }
                Some(b'\n' | b'\r') => {
                    self.advance_char();
                    buf.push(b'\n');
                }
                Some(ch) => {
                    self.advance_char();
                    buf.push(ch);
                }
            }
        }
    }

    fn check_closing_long_bracket(&self, level: usize) -> bool {
        (1..=level).all(|i| self.peek_at(i) == Some(b'=')) && self.peek_at(level + 1) == Some(b']')
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

/// Encode a code point as UTF-8, extended to six bytes for values up to 0x7FFFFFFF.
fn encode_utf8(code: u32, buf: &mut Vec<u8>) {
    if code <= 0x7F {
        buf.push(code as u8);
        return;
    }
    let mut tail = Vec::with_capacity(5);
    let mut rest = code;
    // Largest value the lead byte can hold for each sequence length.
    let mut lead_max = 0x3F;
    while rest > lead_max {
        tail.push(0x80 | (rest & 0x3F) as u8);
        rest >>= 6;
        lead_max >>= 1;
    }
    let lead_prefix = !((lead_max << 1) | 1) as u8;
    buf.push(lead_prefix | rest as u8);
    buf.extend(tail.iter().rev());
}

fn hex_value(ch: u8) -> u8 {
    match ch {
        b'0'..=b'9' => ch - b'0',
        b'a'..=b'f' => ch - b'a' + 10,
        b'A'..=b'F' => ch - b'A' + 10,
        _ => 0,
    }
}

/// Parse the part of a hex float after `0x`, e.g. `1.8p3`.
fn parse_hex_float(text: &str) -> Option<f64> {
    let (mantissa, exponent) = match text.find(['p', 'P']) {
        Some(p) => (&text[..p], text[p + 1..].parse::<i32>().ok()?),
        None => (text, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mut value = int_part
        .bytes()
        .fold(0.0f64, |acc, c| acc * 16.0 + hex_value(c) as f64);
    let mut place = 1.0 / 16.0;
    for c in frac_part.bytes() {
        value += hex_value(c) as f64 * place;
        place /= 16.0;
    }
    Some(value * 2.0f64.powi(exponent))
}
