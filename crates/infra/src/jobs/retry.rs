//! Automatic and manual retries, and retry-chain lookup.

use tracing::{error, info, warn};

use orgflags_core::{DomainError, JobId};

use super::error::JobError;
use super::executor::{JobQueue, QueueClosed};
use super::lifecycle::JobLifecycleManager;
use super::store::JobStore;
use super::types::{FeatureFlagJob, JobOutcome, JobStatus, RetryPolicy};

/// Turns failed jobs into linked retry jobs.
///
/// A retry is always a new record: `parent_job_id` names the attempt it
/// replaces and `root_job_id` names the first job of the chain, so history
/// is never overwritten.
#[derive(Debug, Clone)]
pub struct RetryScheduler<S> {
    lifecycle: JobLifecycleManager<S>,
    policy: RetryPolicy,
    queue: JobQueue,
}

impl<S: JobStore> RetryScheduler<S> {
    pub fn new(lifecycle: JobLifecycleManager<S>, policy: RetryPolicy, queue: JobQueue) -> Self {
        Self {
            lifecycle,
            policy,
            queue,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Handle a whole-job failure of a running job.
    pub fn on_failure(&self, job: &mut FeatureFlagJob, cause: &JobError) -> Result<JobOutcome, JobError> {
        let reason = cause.to_string();

        if !job.can_retry() {
            self.lifecycle.fail(job, &reason)?;
            error!(
                job_id = %job.id,
                retry_count = job.retry_count,
                max_retries = job.max_retries,
                error = %reason,
                "propagation failed; retries exhausted"
            );
            return Ok(JobOutcome::Failed { reason });
        }

        self.lifecycle.retrying(job, &reason)?;
        let delay = self.policy.delay_for(job.retry_count);
        let retry = FeatureFlagJob::automatic_retry_of(job);
        self.lifecycle.register(&retry)?;

        warn!(
            job_id = %job.id,
            retry_job_id = %retry.id,
            retry_count = retry.retry_count,
            max_retries = retry.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %reason,
            "propagation failed; retry scheduled"
        );

        let retry_job_id = retry.id;
        self.dispatch(retry, |queue, id| queue.submit_after(id, delay))?;
        Ok(JobOutcome::RetryScheduled { retry_job_id, delay })
    }

    /// Operator-triggered retry of a FAILED job; runs immediately.
    pub fn manual_retry(&self, job_id: JobId) -> Result<FeatureFlagJob, JobError> {
        let failed = self.lifecycle.load(job_id)?;
        if failed.status != JobStatus::Failed {
            return Err(DomainError::invalid_state(format!(
                "only failed jobs can be retried; job {} is {}",
                job_id, failed.status
            ))
            .into());
        }

        let retry = FeatureFlagJob::manual_retry_of(&failed);
        self.lifecycle.register(&retry)?;
        info!(
            job_id = %job_id,
            retry_job_id = %retry.id,
            max_retries = retry.max_retries,
            "manual retry created"
        );

        self.dispatch(retry.clone(), |queue, id| queue.submit(id))?;
        Ok(retry)
    }

    /// The root of the job's chain followed by every retry in it, oldest first.
    pub fn retry_chain(&self, job_id: JobId) -> Result<Vec<FeatureFlagJob>, JobError> {
        let job = self.lifecycle.load(job_id)?;
        let root = job.chain_root();

        let mut chain: Vec<_> = self
            .lifecycle
            .store()
            .list_for_organization(job.organization_id)?
            .into_iter()
            .filter(|j| j.id == root || j.root_job_id == Some(root))
            .collect();
        chain.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(chain)
    }

    fn dispatch<F>(&self, mut job: FeatureFlagJob, submit: F) -> Result<(), JobError>
    where
        F: FnOnce(&JobQueue, JobId) -> Result<(), QueueClosed>,
    {
        if submit(&self.queue, job.id).is_ok() {
            return Ok(());
        }
        let cause = JobError::QueueClosed(job.id);
        if let Err(e) = self.lifecycle.fail(&mut job, &cause.to_string()) {
            error!(job_id = %job.id, error = %e, "could not fail undispatched retry");
        }
        Err(cause)
    }
}
