//! Error types for verdant-expr

use thiserror::Error;

/// Expression errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    /// Malformed input at a byte offset
    #[error("Syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    /// Operands of the wrong type for an operator
    #[error("Type error: {0}")]
    Type(String),

    /// A `{id}` placeholder survived substitution
    #[error("Unresolved placeholder: {{{0}}}")]
    UnresolvedPlaceholder(String),

    /// Template references an id with no matching sub-condition
    #[error("Unknown placeholder: {{{0}}}")]
    UnknownPlaceholder(String),
}

impl ExprError {
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ExprError>;
