//! Error types for the compiler.
//!
//! All front-end failures funnel into [`CompileError`]. The first error is
//! fatal: callers propagate with `?` and the driver exits after printing the
//! diagnostic. Encoder operand-combination violations are programmer
//! invariants and panic instead of returning an error.

use crate::lexer::SourceLocation;
use thiserror::Error;

/// Main error type for compilation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("{loc}: syntax error: {message}")]
    Syntax {
        message: String,
        loc: SourceLocation,
    },

    #[error("{loc}: {message}")]
    Semantic {
        message: String,
        loc: SourceLocation,
    },

    #[error("{loc}: invalid declaration specifiers: {message}")]
    Specifiers {
        message: String,
        loc: SourceLocation,
    },

    /// Type errors raised by expression evaluation, where no source location
    /// is at hand. The parser attaches one when it can.
    #[error("type error: {message}")]
    Type { message: String },

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("failed to write object file: {reason}")]
    ObjectWrite { reason: String },
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, loc: SourceLocation) -> Self {
        CompileError::Syntax {
            message: message.into(),
            loc,
        }
    }

    pub fn semantic(message: impl Into<String>, loc: SourceLocation) -> Self {
        CompileError::Semantic {
            message: message.into(),
            loc,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        CompileError::Type {
            message: message.into(),
        }
    }

    /// Attach a location to a floating type error; other errors pass through.
    pub fn at(self, loc: SourceLocation) -> Self {
        match self {
            CompileError::Type { message } => CompileError::Semantic { message, loc },
            other => other,
        }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
