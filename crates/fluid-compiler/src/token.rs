use smol_str::SmolStr;
use std::fmt;

/// Source location of a token or AST node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub line: u32,
    pub column: u32,
    /// Byte offset into the source.
    pub offset: u32,
}

impl Span {
    pub fn new(line: u32, column: u32, offset: u32) -> Self {
        Span {
            line,
            column,
            offset,
        }
    }
}

/// A token with its source location.
#[derive(Clone, Debug, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// All Fluid tokens: Lua 5.4 plus the extension lexemes.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    // --- Keywords ---
    And,
    Break,
    Check,
    Continue,
    Defer,
    Do,
    Else,
    ElseIf,
    End,
    False,
    For,
    Function,
    Global,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Raise,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // --- Literals ---
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
    Name(SmolStr),

    // --- Single-char operators/punctuation ---
    Plus,        // +
    Minus,       // -
    Star,        // *
    Slash,       // /
    Percent,     // %
    Caret,       // ^
    Hash,        // #
    Ampersand,   // &
    Tilde,       // ~
    Pipe,        // |
    Less,        // <
    Greater,     // >
    Assign,      // =
    Arrow,       // =>
    LParen,      // (
    RParen,      // )
    LBrace,      // {
    RBrace,      // }
    LBracket,    // [
    RBracket,    // ]
    Semi,        // ;
    Colon,       // :
    Comma,       // ,
    Dot,         // .
    Question,    // ?

    // --- Multi-char operators ---
    DoubleColon, // ::
    ShiftLeft,   // <<
    ShiftRight,  // >>
    FloorDiv,    // //
    Equal,       // ==
    NotEqual,    // ~= or !=
    LessEq,      // <=
    GreaterEq,   // >=
    DotDot,      // ..
    DotDotDot,   // ...

    // --- Extension operators ---
    SafeDot,         // ?.
    SafeBracket,     // ?[
    SafeColon,       // ?:
    DoubleQuestion,  // ??
    TernarySep,      // :>
    /// `|>` (limit 0, forward everything) or `|N>`.
    PipeCall(u32),
    DeferOpen,       // <{
    DeferClose,      // }>
    PlusPlus,        // ++
    PlusAssign,      // +=
    MinusAssign,     // -=
    StarAssign,      // *=
    SlashAssign,     // /=
    PercentAssign,   // %=
    ConcatAssign,    // ..=
    IfEmptyAssign,   // ??=

    Eof,
}

impl Token {
    /// Try to match a keyword from an identifier string.
    pub fn keyword_from_str(s: &str) -> Option<Token> {
        match s {
            "and" => Some(Token::And),
            "break" => Some(Token::Break),
            "check" => Some(Token::Check),
            "continue" => Some(Token::Continue),
            "defer" => Some(Token::Defer),
            "do" => Some(Token::Do),
            "else" => Some(Token::Else),
            "elseif" => Some(Token::ElseIf),
            "end" => Some(Token::End),
            "false" => Some(Token::False),
            "for" => Some(Token::For),
            "function" => Some(Token::Function),
            "global" => Some(Token::Global),
            "goto" => Some(Token::Goto),
            "if" => Some(Token::If),
            "in" => Some(Token::In),
            "local" => Some(Token::Local),
            "nil" => Some(Token::Nil),
            "not" => Some(Token::Not),
            "or" => Some(Token::Or),
            "raise" => Some(Token::Raise),
            "repeat" => Some(Token::Repeat),
            "return" => Some(Token::Return),
            "then" => Some(Token::Then),
            "true" => Some(Token::True),
            "until" => Some(Token::Until),
            "while" => Some(Token::While),
            _ => None,
        }
    }

    /// Whether this token may begin an expression. Drives the postfix
    /// presence decision in the token stream.
    pub fn starts_expression(&self) -> bool {
        matches!(
            self,
            Token::Integer(_)
                | Token::Float(_)
                | Token::String(_)
                | Token::Name(_)
                | Token::Nil
                | Token::True
                | Token::False
                | Token::DotDotDot
                | Token::Function
                | Token::LBrace
                | Token::LParen
                | Token::LBracket
                | Token::DeferOpen
                | Token::Not
                | Token::PlusPlus
                | Token::Minus
                | Token::Tilde
                | Token::Hash
        )
    }

    /// Whether this token closes a block.
    pub fn is_block_end(&self) -> bool {
        matches!(
            self,
            Token::End | Token::Else | Token::ElseIf | Token::Until | Token::Eof
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::And => "and",
            Token::Break => "break",
            Token::Check => "check",
            Token::Continue => "continue",
            Token::Defer => "defer",
            Token::Do => "do",
            Token::Else => "else",
            Token::ElseIf => "elseif",
            Token::End => "end",
            Token::False => "false",
            Token::For => "for",
            Token::Function => "function",
            Token::Global => "global",
            Token::Goto => "goto",
            Token::If => "if",
            Token::In => "in",
            Token::Local => "local",
            Token::Nil => "nil",
            Token::Not => "not",
            Token::Or => "or",
            Token::Raise => "raise",
            Token::Repeat => "repeat",
            Token::Return => "return",
            Token::Then => "then",
            Token::True => "true",
            Token::Until => "until",
            Token::While => "while",
            Token::Integer(i) => return write!(f, "{i}"),
            Token::Float(fl) => return write!(f, "{fl}"),
            Token::String(bytes) => return write!(f, "\"{}\"", String::from_utf8_lossy(bytes)),
            Token::Name(name) => return write!(f, "{name}"),
            Token::PipeCall(0) => "|>",
            Token::PipeCall(n) => return write!(f, "|{n}>"),
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Caret => "^",
            Token::Hash => "#",
            Token::Ampersand => "&",
            Token::Tilde => "~",
            Token::Pipe => "|",
            Token::Less => "<",
            Token::Greater => ">",
            Token::Assign => "=",
            Token::Arrow => "=>",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Semi => ";",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Question => "?",
            Token::DoubleColon => "::",
            Token::ShiftLeft => "<<",
            Token::ShiftRight => ">>",
            Token::FloorDiv => "//",
            Token::Equal => "==",
            Token::NotEqual => "~=",
            Token::LessEq => "<=",
            Token::GreaterEq => ">=",
            Token::DotDot => "..",
            Token::DotDotDot => "...",
            Token::SafeDot => "?.",
            Token::SafeBracket => "?[",
            Token::SafeColon => "?:",
            Token::DoubleQuestion => "??",
            Token::TernarySep => ":>",
            Token::DeferOpen => "<{",
            Token::DeferClose => "}>",
            Token::PlusPlus => "++",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::PercentAssign => "%=",
            Token::ConcatAssign => "..=",
            Token::IfEmptyAssign => "??=",
            Token::Eof => "<eof>",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_keywords() {
        assert_eq!(Token::keyword_from_str("continue"), Some(Token::Continue));
        assert_eq!(Token::keyword_from_str("defer"), Some(Token::Defer));
        assert_eq!(Token::keyword_from_str("Defer"), None);
        assert_eq!(Token::keyword_from_str("global"), Some(Token::Global));
        assert_eq!(Token::keyword_from_str("raise"), Some(Token::Raise));
        assert_eq!(Token::keyword_from_str("check"), Some(Token::Check));
    }

    #[test]
    fn test_starts_expression() {
        assert!(Token::Name(SmolStr::new("x")).starts_expression());
        assert!(Token::PlusPlus.starts_expression());
        assert!(Token::LBracket.starts_expression());
        assert!(!Token::Return.starts_expression());
        assert!(!Token::RParen.starts_expression());
        assert!(!Token::Plus.starts_expression());
    }

    #[test]
    fn test_display_pipe() {
        assert_eq!(Token::PipeCall(0).to_string(), "|>");
        assert_eq!(Token::PipeCall(3).to_string(), "|3>");
    }
}
