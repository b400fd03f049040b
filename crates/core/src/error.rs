//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Dependency failures (gateway,
/// storage, notifications) are modelled by the workflow layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Bad input shape or range (negative price, empty cart, unknown unit).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The addressed record does not exist (or is not visible to the caller).
    #[error("not found: {0}")]
    NotFound(String),

    /// The command is not allowed from the aggregate's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A granting or issuing transition already happened; repeating it must not
    /// produce a second grant.
    #[error("already granted: {0}")]
    AlreadyGranted(String),

    /// Stale read / optimistic concurrency failure.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn already_granted(msg: impl Into<String>) -> Self {
        Self::AlreadyGranted(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
