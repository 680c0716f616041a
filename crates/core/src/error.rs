//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Raised when identifiers or object keys fail validation. Backend failures
/// belong to the infrastructure error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. empty or parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// An object key was invalid.
    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
