use crate::span::Span;
use thiserror::Error;

/// Lex or parse failure. Always a value, never a panic; callers decide
/// whether the file it came from is fatal (entry) or soft (included).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} at {span}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        ParseError {
            message: message.into(),
            span,
        }
    }
}
