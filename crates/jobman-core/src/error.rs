//! Error types for jobman.

use thiserror::Error;

/// Errors returned by registry operations.
///
/// `NotFound`, `Conflict` and `InvalidInput` are caller-logic signals: the
/// registry is left unchanged when one of them is returned. `InvariantViolation`
/// means the registry detected internal corruption and must not be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Whether this error indicates registry corruption rather than misuse.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvariantViolation(_))
    }

    /// Whether the id or child id was not registered.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether the operation collided with an existing job or link.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
