use thiserror::Error;

use orgflags_core::{DomainError, JobId, OrganizationId, RepositoryError};

use super::store::JobStoreError;

/// Failure of a job operation.
///
/// Returned from a propagation run, this is a whole-job failure and is what
/// triggers the retry path. Per-organization flag write failures on
/// descendants never surface here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("job state: {0}")]
    Lifecycle(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("flag write for organization {organization_id} failed: {source}")]
    Flag {
        organization_id: OrganizationId,
        source: RepositoryError,
    },
    #[error("descendant resolution failed: {0}")]
    Resolution(RepositoryError),
    #[error("job {0} could not be queued: executor is shut down")]
    QueueClosed(JobId),
}

impl JobError {
    pub fn job_not_found(job_id: JobId) -> Self {
        Self::Store(JobStoreError::NotFound(job_id))
    }
}
