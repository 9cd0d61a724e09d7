//! Persisted state changes of propagation jobs.

use tracing::{debug, info, warn};

use orgflags_core::{DomainResult, JobId, OrganizationId};

use super::error::JobError;
use super::store::JobStore;
use super::types::FeatureFlagJob;

/// Default number of processed organizations between progress writes.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;

/// Applies job state transitions and writes them through to the store.
///
/// Progress is persisted every `checkpoint_interval` organizations and on the
/// last one, so an observer never sees `processed` lag `total` on a
/// completed job.
#[derive(Debug, Clone)]
pub struct JobLifecycleManager<S> {
    store: S,
    checkpoint_interval: usize,
}

impl<S: JobStore> JobLifecycleManager<S> {
    pub fn new(store: S, checkpoint_interval: usize) -> Self {
        Self {
            store,
            checkpoint_interval: checkpoint_interval.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn create(
        &self,
        organization_id: OrganizationId,
        flag_name: &str,
        enabled: bool,
        total_organizations: usize,
        max_retries: u32,
    ) -> Result<FeatureFlagJob, JobError> {
        let job = FeatureFlagJob::new(organization_id, flag_name, enabled, total_organizations)
            .with_max_retries(max_retries);
        self.store.insert(job.clone())?;
        info!(
            job_id = %job.id,
            organization_id = %organization_id,
            flag = flag_name,
            enabled,
            total = total_organizations,
            "propagation job created"
        );
        Ok(job)
    }

    /// Persist a job built elsewhere (retries).
    pub fn register(&self, job: &FeatureFlagJob) -> Result<(), JobError> {
        self.store.insert(job.clone())?;
        Ok(())
    }

    pub fn load(&self, job_id: JobId) -> Result<FeatureFlagJob, JobError> {
        self.store
            .get(job_id)?
            .ok_or_else(|| JobError::job_not_found(job_id))
    }

    /// PENDING -> IN_PROGRESS.
    pub fn claim(&self, job: &mut FeatureFlagJob) -> Result<(), JobError> {
        self.transition(job, FeatureFlagJob::mark_in_progress)?;
        debug!(job_id = %job.id, retry_count = job.retry_count, "job claimed");
        Ok(())
    }

    pub fn checkpoint(&self, job: &FeatureFlagJob) -> Result<(), JobError> {
        self.store.update(job)?;
        debug!(
            job_id = %job.id,
            processed = job.processed_organizations,
            total = job.total_organizations,
            "progress checkpoint"
        );
        Ok(())
    }

    pub fn is_checkpoint_due(&self, job: &FeatureFlagJob) -> bool {
        job.processed_organizations % self.checkpoint_interval == 0 || job.is_fully_processed()
    }

    /// Count one organization; persists when a checkpoint is due.
    pub fn record_processed(&self, job: &mut FeatureFlagJob) -> Result<(), JobError> {
        job.increment_processed();
        if self.is_checkpoint_due(job) {
            self.checkpoint(job)?;
        }
        Ok(())
    }

    /// Align the stored total with the hierarchy as it is now.
    pub fn correct_total(&self, job: &mut FeatureFlagJob, descendants: usize) -> Result<(), JobError> {
        let previous = job.total_organizations;
        if job.correct_total(descendants + 1) {
            warn!(
                job_id = %job.id,
                previous,
                total = job.total_organizations,
                "hierarchy changed since job creation; total corrected"
            );
            self.store.update(job)?;
        }
        Ok(())
    }

    pub fn complete(&self, job: &mut FeatureFlagJob) -> Result<(), JobError> {
        self.transition(job, FeatureFlagJob::mark_completed)
    }

    pub fn fail(&self, job: &mut FeatureFlagJob, reason: &str) -> Result<(), JobError> {
        self.transition(job, |next| next.mark_failed(reason))
    }

    /// Count the attempt against the budget and hand the record over to a retry.
    pub fn retrying(&self, job: &mut FeatureFlagJob, reason: &str) -> Result<(), JobError> {
        self.transition(job, |next| {
            next.mark_retrying(reason)?;
            next.increment_retry_count();
            Ok(())
        })
    }

    /// Apply a status change to a copy and adopt it once stored.
    ///
    /// On any error `job` is left as last persisted, so the failure path
    /// still starts from the stored status.
    fn transition<F>(&self, job: &mut FeatureFlagJob, change: F) -> Result<(), JobError>
    where
        F: FnOnce(&mut FeatureFlagJob) -> DomainResult<()>,
    {
        let mut next = job.clone();
        change(&mut next)?;
        self.store.update(&next)?;
        *job = next;
        Ok(())
    }
}
