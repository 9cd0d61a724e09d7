//! Domain and repository error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (unknown ids,
/// hierarchy invariants, illegal state transitions). Storage failures are
/// reported through [`RepositoryError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A parent assignment would create a cycle or a second parent.
    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    /// The operation is not allowed in the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The request conflicts with what is already recorded.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl DomainError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_hierarchy(msg: impl Into<String>) -> Self {
        Self::InvalidHierarchy(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Failure reported by a repository (organization or flag storage).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The backing store could not complete the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Stored data violates an invariant the caller relies on.
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

impl RepositoryError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}
