//! Propagation job record, state machine and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orgflags_core::{DomainError, DomainResult, Entity, JobId, OrganizationId};

/// Retry budget given to a job created by a flag change.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for a worker
    Pending,
    /// Claimed by a worker, propagation running
    InProgress,
    /// Every reachable organization was processed
    Completed,
    /// Failed with no automatic retry left
    Failed,
    /// Failed, and a linked retry job has been scheduled
    Retrying,
}

impl JobStatus {
    /// No further execution will happen on this record.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Retrying
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Retrying)
                | (Failed, Pending)
                | (Retrying, Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backoff between automatic retries: `base_delay * 2^retry_count`.
///
/// No jitter and no cap; with the default 1s base the n-th retry waits
/// exactly 2^n seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn exponential(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Delay before running the retry created when `retry_count` was reached.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// One tracked attempt to propagate a flag value across a subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlagJob {
    pub id: JobId,
    /// Root of the subtree being updated
    pub organization_id: OrganizationId,
    pub flag_name: String,
    pub enabled: bool,
    pub status: JobStatus,
    /// Root plus descendants
    pub total_organizations: usize,
    pub processed_organizations: usize,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Job this one retries (None for an original job)
    pub parent_job_id: Option<JobId>,
    /// First job of the retry chain (None for an original job)
    pub root_job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FeatureFlagJob {
    /// A fresh PENDING job.
    pub fn new(
        organization_id: OrganizationId,
        flag_name: impl Into<String>,
        enabled: bool,
        total_organizations: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            organization_id,
            flag_name: flag_name.into(),
            enabled,
            status: JobStatus::Pending,
            total_organizations,
            processed_organizations: 0,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            parent_job_id: None,
            root_job_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Clone of a failed job for an automatic retry.
    ///
    /// Carries the (already incremented) retry count and budget of the source.
    pub fn automatic_retry_of(failed: &FeatureFlagJob) -> Self {
        let mut retry = Self::linked_to(failed);
        retry.retry_count = failed.retry_count;
        retry.max_retries = failed.max_retries;
        retry
    }

    /// Fresh job for an operator-triggered retry.
    ///
    /// The retry count starts over and the budget grows by one, so the new
    /// job gets `max_retries + 1` automatic retries of its own.
    pub fn manual_retry_of(failed: &FeatureFlagJob) -> Self {
        let mut retry = Self::linked_to(failed);
        retry.max_retries = failed.max_retries.saturating_add(1);
        retry
    }

    fn linked_to(source: &FeatureFlagJob) -> Self {
        let mut job = Self::new(
            source.organization_id,
            source.flag_name.clone(),
            source.enabled,
            source.total_organizations,
        );
        job.parent_job_id = Some(source.id);
        job.root_job_id = Some(source.chain_root());
        job
    }

    /// Id of the first job in this job's retry chain.
    pub fn chain_root(&self) -> JobId {
        self.root_job_id.unwrap_or(self.id)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    fn transition(&mut self, next: JobStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_state(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_in_progress(&mut self) -> DomainResult<()> {
        self.transition(JobStatus::InProgress)
    }

    pub fn mark_completed(&mut self) -> DomainResult<()> {
        self.transition(JobStatus::Completed)?;
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> DomainResult<()> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(error.into());
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// The record failed and a linked retry job takes over.
    pub fn mark_retrying(&mut self, error: impl Into<String>) -> DomainResult<()> {
        self.transition(JobStatus::Retrying)?;
        self.error_message = Some(error.into());
        Ok(())
    }

    /// Reuse this record for another attempt instead of cloning it.
    pub fn reset_for_retry(&mut self) -> DomainResult<()> {
        self.transition(JobStatus::Pending)?;
        self.processed_organizations = 0;
        self.error_message = None;
        self.completed_at = None;
        Ok(())
    }

    pub fn increment_processed(&mut self) {
        debug_assert!(self.processed_organizations < self.total_organizations);
        self.processed_organizations += 1;
        self.updated_at = Utc::now();
    }

    pub fn increment_retry_count(&mut self) {
        self.retry_count += 1;
        self.updated_at = Utc::now();
    }

    /// Replace a stale total; returns whether it changed.
    pub fn correct_total(&mut self, total: usize) -> bool {
        let total = total.max(self.processed_organizations);
        if self.total_organizations == total {
            return false;
        }
        self.total_organizations = total;
        self.updated_at = Utc::now();
        true
    }

    pub fn is_fully_processed(&self) -> bool {
        self.processed_organizations == self.total_organizations
    }
}

impl Entity for FeatureFlagJob {
    type Id = JobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// What one execution of a job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        processed: usize,
        total: usize,
    },
    /// The job failed and a linked retry will run after `delay`.
    RetryScheduled {
        retry_job_id: JobId,
        delay: Duration,
    },
    /// The job failed with its retry budget exhausted.
    Failed {
        reason: String,
    },
}
