//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use orgflags_core::{JobId, OrganizationId};

use super::types::{FeatureFlagJob, JobStatus};

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Persist a new job.
    fn insert(&self, job: FeatureFlagJob) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<FeatureFlagJob>, JobStoreError>;

    /// Overwrite an existing job.
    fn update(&self, job: &FeatureFlagJob) -> Result<(), JobStoreError>;

    /// Jobs rooted at an organization, newest first.
    fn list_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<FeatureFlagJob>, JobStoreError>;

    /// Jobs in a status, newest first.
    fn list_by_status(&self, status: JobStatus) -> Result<Vec<FeatureFlagJob>, JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn insert(&self, job: FeatureFlagJob) -> Result<JobId, JobStoreError> {
        (**self).insert(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<FeatureFlagJob>, JobStoreError> {
        (**self).get(job_id)
    }

    fn update(&self, job: &FeatureFlagJob) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn list_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<FeatureFlagJob>, JobStoreError> {
        (**self).list_for_organization(organization_id)
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<FeatureFlagJob>, JobStoreError> {
        (**self).list_by_status(status)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
}

impl JobStats {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed + self.retrying
    }
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, FeatureFlagJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn collect<P>(&self, predicate: P) -> Result<Vec<FeatureFlagJob>, JobStoreError>
    where
        P: Fn(&FeatureFlagJob) -> bool,
    {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut result: Vec<_> = jobs.values().filter(|j| predicate(j)).cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(result)
    }
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: FeatureFlagJob) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<FeatureFlagJob>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn update(&self, job: &FeatureFlagJob) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        match jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    fn list_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<FeatureFlagJob>, JobStoreError> {
        self.collect(|j| j.organization_id == organization_id)
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<FeatureFlagJob>, JobStoreError> {
        self.collect(|j| j.status == status)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut stats = JobStats::default();

        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::InProgress => stats.in_progress += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Retrying => stats.retrying += 1,
            }
        }

        Ok(stats)
    }
}
