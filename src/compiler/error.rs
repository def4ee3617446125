use thiserror::Error;

use crate::token::Span;

/// Fatal compile-time failures raised by the resolver, the IR builder and the
/// emitter. None of these are recovered from: compilation stops at the first.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("{reason} '{name}' in scope '{scope}' at line {line}, column {column}")]
    BindingConflict {
        scope: String,
        name: String,
        reason: String,
        line: usize,
        column: usize,
    },
    #[error("no binding for nonlocal '{name}' found at line {line}, column {column}")]
    NonlocalNotFound {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("{message} at line {line}, column {column}")]
    Lowering {
        message: String,
        line: usize,
        column: usize,
    },
    #[error("internal compiler error: {message}")]
    Internal { message: String },
}

impl CompileError {
    pub(crate) fn lowering(message: impl Into<String>, span: Span) -> Self {
        Self::Lowering {
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }

    pub(crate) fn conflict(
        scope: &str,
        name: &str,
        reason: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::BindingConflict {
            scope: scope.to_string(),
            name: name.to_string(),
            reason: reason.into(),
            line: span.line,
            column: span.column,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
