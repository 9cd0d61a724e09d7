use thiserror::Error;

use orgflags_core::{DomainError, RepositoryError};
use orgflags_hierarchy::HierarchyError;

use crate::jobs::{JobError, JobStoreError};

/// Error surfaced by [`crate::FeatureFlagService`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid hierarchy: {0}")]
    InvalidHierarchy(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// The executor is shut down and cannot accept jobs.
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DomainError> for ServiceError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::NotFound(msg) => Self::NotFound(msg),
            DomainError::InvalidHierarchy(msg) => Self::InvalidHierarchy(msg),
            DomainError::InvalidState(msg) | DomainError::Validation(msg) => Self::InvalidState(msg),
            DomainError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(e: RepositoryError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<JobStoreError> for ServiceError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(id) => Self::NotFound(format!("Job not found: {id}")),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<HierarchyError> for ServiceError {
    fn from(e: HierarchyError) -> Self {
        match e {
            HierarchyError::Rejected(domain) => domain.into(),
            HierarchyError::Repository(repo) => repo.into(),
        }
    }
}

impl From<JobError> for ServiceError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::Lifecycle(domain) => domain.into(),
            JobError::Store(store) => store.into(),
            JobError::QueueClosed(_) => Self::Unavailable(e.to_string()),
            JobError::Flag { .. } | JobError::Resolution(_) => Self::Storage(e.to_string()),
        }
    }
}
