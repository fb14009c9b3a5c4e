//! Structured parse/emit errors and the diagnostics store.
use crate::lexer::LexError;
use crate::token::{Span, SpannedToken};
use smol_str::SmolStr;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A required terminal was missing.
    ExpectedToken,
    ExpectedIdentifier,
    /// Grammar violation.
    UnexpectedToken,
    ExpectedTypeName,
    UnknownTypeName,
    /// An internal capacity limit was hit.
    LimitExceeded,
    /// Lexical error.
    InvalidSyntax,
}

/// A single failure, tied to the offending token.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{}:{}: {message}", span.line, span.column)]
pub struct ParseError {
    pub code: ErrorCode,
    /// Source text of the offending token.
    pub token: String,
    pub span: Span,
    pub message: String,
}

impl ParseError {
    pub fn new(code: ErrorCode, token: &SpannedToken, message: impl Into<String>) -> Self {
        ParseError {
            code,
            token: token.token.to_string(),
            span: token.span,
            message: message.into(),
        }
    }

    /// An error not tied to a particular token, such as a limit hit during emission.
    pub fn at(code: ErrorCode, span: Span, message: impl Into<String>) -> Self {
        ParseError {
            code,
            token: String::new(),
            span,
            message: message.into(),
        }
    }

    pub fn line(&self) -> u32 {
        self.span.line
    }

    pub fn column(&self) -> u32 {
        self.span.column
    }

    /// (line, column, message).
    pub fn triple(&self) -> (u32, u32, &str) {
        (self.span.line, self.span.column, self.message.as_str())
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError {
            code: ErrorCode::InvalidSyntax,
            token: String::new(),
            span: Span::new(e.line, e.column, 0),
            message: e.message,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub error: ParseError,
}

/// Errors and warnings collected while compiling one chunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Diagnostics {
    chunk: SmolStr,
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new(chunk: impl Into<SmolStr>) -> Self {
        Diagnostics {
            chunk: chunk.into(),
            entries: Vec::new(),
        }
    }

    pub fn chunk(&self) -> &str {
        &self.chunk
    }

    pub fn push_error(&mut self, error: ParseError) {
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            error,
        });
    }

    pub fn push_warning(&mut self, error: ParseError) {
        log::warn!("{}:{}", self.chunk, error);
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            error,
        });
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ParseError> {
        self.with_severity(Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ParseError> {
        self.with_severity(Severity::Warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &ParseError> {
        self.entries
            .iter()
            .filter(move |d| d.severity == severity)
            .map(|d| &d.error)
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let label = match entry.severity {
                Severity::Error => "",
                Severity::Warning => "warning: ",
            };
            let e = &entry.error;
            write!(
                f,
                "{}:{}:{}: {label}{}",
                self.chunk, e.span.line, e.span.column, e.message
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

/// Failure of a whole compilation.
#[derive(Clone, Debug, Error)]
pub enum CompileError {
    /// Fail-fast mode: the first error.
    #[error("{chunk}:{error}")]
    Parse { chunk: SmolStr, error: ParseError },
    /// Accumulate mode: every error recorded before giving up.
    #[error("{0}")]
    Diagnostics(Diagnostics),
}

impl CompileError {
    /// (line, column, message) for every error.
    pub fn diagnostics(&self) -> Vec<(u32, u32, &str)> {
        match self {
            CompileError::Parse { error, .. } => vec![error.triple()],
            CompileError::Diagnostics(d) => d.errors().map(ParseError::triple).collect(),
        }
    }

    /// The first error.
    pub fn first(&self) -> Option<&ParseError> {
        match self {
            CompileError::Parse { error, .. } => Some(error),
            CompileError::Diagnostics(d) => d.errors().next(),
        }
    }
}
