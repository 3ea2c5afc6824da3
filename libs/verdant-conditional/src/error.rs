//! Conditional Controller Error Types

use thiserror::Error;
use verdant_expr::ExprError;

/// Result type for conditional operations
pub type Result<T> = std::result::Result<T, ConditionalError>;

/// Conditional controller errors
#[derive(Debug, Error)]
pub enum ConditionalError {
    /// Conditional not found in the store
    #[error("Conditional not found: {0}")]
    NotFound(String),

    /// A sub-condition cannot be mapped to a concrete data source
    #[error("Resolution failure: {0}")]
    Resolution(String),

    /// Expression failed to parse or evaluate
    #[error("Expression error: {0}")]
    Expression(#[from] ExprError),

    /// Invalid rule definition
    #[error("Invalid conditional: {0}")]
    InvalidDefinition(String),

    /// Digital input read error
    #[error("Input error: {0}")]
    Input(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for ConditionalError {
    fn from(err: sqlx::Error) -> Self {
        ConditionalError::Database(err.to_string())
    }
}
