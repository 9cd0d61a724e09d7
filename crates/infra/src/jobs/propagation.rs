//! Execution of one propagation job over an organization subtree.

use tracing::{error, info, warn};

use orgflags_core::JobId;
use orgflags_flags::{FlagRepository, FlagStore};
use orgflags_hierarchy::{OrgHierarchyResolver, OrganizationRepository};

use super::error::JobError;
use super::lifecycle::JobLifecycleManager;
use super::retry::RetryScheduler;
use super::store::JobStore;
use super::types::{FeatureFlagJob, JobOutcome};

/// Writes a job's flag value to its root organization and every descendant.
///
/// A failed write on the root, a failed descendant lookup, or a failed
/// progress write fails the whole job and goes to the retry path. A failed
/// write on a single descendant is logged and skipped.
#[derive(Debug, Clone)]
pub struct PropagationExecutor<O, F, S> {
    resolver: OrgHierarchyResolver<O>,
    flags: FlagStore<F>,
    lifecycle: JobLifecycleManager<S>,
    retry: RetryScheduler<S>,
}

impl<O, F, S> PropagationExecutor<O, F, S>
where
    O: OrganizationRepository,
    F: FlagRepository,
    S: JobStore,
{
    pub fn new(
        resolver: OrgHierarchyResolver<O>,
        flags: FlagStore<F>,
        lifecycle: JobLifecycleManager<S>,
        retry: RetryScheduler<S>,
    ) -> Self {
        Self {
            resolver,
            flags,
            lifecycle,
            retry,
        }
    }

    pub fn lifecycle(&self) -> &JobLifecycleManager<S> {
        &self.lifecycle
    }

    pub fn retry_scheduler(&self) -> &RetryScheduler<S> {
        &self.retry
    }

    /// Run a PENDING job to a terminal state.
    ///
    /// An `Err` means the job could not be claimed or its failure could not
    /// be recorded; any other failure is reported through the outcome.
    pub fn run(&self, job_id: JobId) -> Result<JobOutcome, JobError> {
        let mut job = self.lifecycle.load(job_id)?;
        self.lifecycle.claim(&mut job)?;

        match self.propagate(&mut job) {
            Ok(outcome) => Ok(outcome),
            Err(cause) => {
                error!(
                    job_id = %job.id,
                    organization_id = %job.organization_id,
                    processed = job.processed_organizations,
                    error = %cause,
                    "propagation job failed"
                );
                self.retry.on_failure(&mut job, &cause)
            }
        }
    }

    fn propagate(&self, job: &mut FeatureFlagJob) -> Result<JobOutcome, JobError> {
        let root = job.organization_id;
        info!(
            job_id = %job.id,
            organization_id = %root,
            flag = %job.flag_name,
            enabled = job.enabled,
            retry_count = job.retry_count,
            "propagation started"
        );

        self.flags
            .set(root, &job.flag_name, job.enabled)
            .map_err(|source| JobError::Flag {
                organization_id: root,
                source,
            })?;
        job.increment_processed();
        self.lifecycle.checkpoint(job)?;

        let descendants = self
            .resolver
            .descendant_ids(root)
            .map_err(JobError::Resolution)?;
        self.lifecycle.correct_total(job, descendants.len())?;

        let mut skipped = 0usize;
        for organization_id in descendants {
            match self.flags.set(organization_id, &job.flag_name, job.enabled) {
                Ok(()) => self.lifecycle.record_processed(job)?,
                Err(e) => {
                    skipped += 1;
                    warn!(
                        job_id = %job.id,
                        organization_id = %organization_id,
                        error = %e,
                        "flag write failed; organization skipped"
                    );
                }
            }
        }

        if skipped > 0 && !job.is_fully_processed() {
            self.lifecycle.checkpoint(job)?;
        }
        self.lifecycle.complete(job)?;

        info!(
            job_id = %job.id,
            processed = job.processed_organizations,
            total = job.total_organizations,
            skipped,
            "propagation completed"
        );
        Ok(JobOutcome::Completed {
            processed: job.processed_organizations,
            total: job.total_organizations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PropagationConfig;
    use crate::jobs::executor::JobExecutor;
    use crate::jobs::store::{InMemoryJobStore, JobStats, JobStoreError};
    use crate::jobs::types::{JobStatus, RetryPolicy};
    use orgflags_core::{OrganizationId, RepositoryError};
    use orgflags_flags::{FeatureFlagAssignment, InMemoryFlagRepository};
    use orgflags_hierarchy::{InMemoryOrganizationRepository, Organization};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn id(v: i64) -> OrganizationId {
        OrganizationId::new(v)
    }

    /// Flag repository that rejects writes for chosen organizations.
    #[derive(Debug, Default)]
    struct RejectingFlags {
        inner: InMemoryFlagRepository,
        rejected: HashSet<OrganizationId>,
    }

    impl FlagRepository for RejectingFlags {
        fn find_by_organization_id_and_name(
            &self,
            organization_id: OrganizationId,
            name: &str,
        ) -> Result<Option<FeatureFlagAssignment>, RepositoryError> {
            self.inner.find_by_organization_id_and_name(organization_id, name)
        }

        fn save(&self, assignment: FeatureFlagAssignment) -> Result<(), RepositoryError> {
            if self.rejected.contains(&assignment.organization_id) {
                return Err(RepositoryError::unavailable("write rejected"));
            }
            self.inner.save(assignment)
        }

        fn count(&self) -> Result<usize, RepositoryError> {
            self.inner.count()
        }
    }

    /// Job store that counts updates and can reject COMPLETED writes.
    #[derive(Debug, Default)]
    struct CountingJobStore {
        inner: InMemoryJobStore,
        updates: AtomicUsize,
        rejected_completions: AtomicUsize,
    }

    impl CountingJobStore {
        fn rejecting_completions(times: usize) -> Self {
            Self {
                rejected_completions: AtomicUsize::new(times),
                ..Default::default()
            }
        }
    }

    impl JobStore for CountingJobStore {
        fn insert(&self, job: FeatureFlagJob) -> Result<JobId, JobStoreError> {
            self.inner.insert(job)
        }

        fn get(&self, job_id: JobId) -> Result<Option<FeatureFlagJob>, JobStoreError> {
            self.inner.get(job_id)
        }

        fn update(&self, job: &FeatureFlagJob) -> Result<(), JobStoreError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            if job.status == JobStatus::Completed
                && self
                    .rejected_completions
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(JobStoreError::Storage("transient".to_string()));
            }
            self.inner.update(job)
        }

        fn list_for_organization(
            &self,
            organization_id: OrganizationId,
        ) -> Result<Vec<FeatureFlagJob>, JobStoreError> {
            self.inner.list_for_organization(organization_id)
        }

        fn list_by_status(&self, status: JobStatus) -> Result<Vec<FeatureFlagJob>, JobStoreError> {
            self.inner.list_by_status(status)
        }

        fn stats(&self) -> Result<JobStats, JobStoreError> {
            self.inner.stats()
        }
    }

    struct Fixture<F, S> {
        engine: PropagationExecutor<Arc<InMemoryOrganizationRepository>, Arc<F>, Arc<S>>,
        orgs: Arc<InMemoryOrganizationRepository>,
        flags: Arc<F>,
        jobs: Arc<S>,
        // keeps the queue open; nothing drains it
        _executor: JobExecutor,
    }

    fn fixture<F: FlagRepository, S: JobStore>(flags: F, jobs: S) -> Fixture<F, S> {
        let (executor, queue) = JobExecutor::new(&PropagationConfig::default());
        let orgs = InMemoryOrganizationRepository::arc();
        let flags = Arc::new(flags);
        let jobs = Arc::new(jobs);
        let lifecycle = JobLifecycleManager::new(jobs.clone(), 10);
        let retry = RetryScheduler::new(
            lifecycle.clone(),
            RetryPolicy::exponential(Duration::from_millis(1)),
            queue,
        );
        let engine = PropagationExecutor::new(
            OrgHierarchyResolver::new(orgs.clone()),
            FlagStore::new(flags.clone()),
            lifecycle,
            retry,
        );
        Fixture {
            engine,
            orgs,
            flags,
            jobs,
            _executor: executor,
        }
    }

    fn star(orgs: &InMemoryOrganizationRepository, root: i64, children: impl IntoIterator<Item = i64>) {
        let mut batch = vec![Organization::root(id(root), "root")];
        batch.extend(
            children
                .into_iter()
                .map(|c| Organization::child(id(c), format!("org {c}"), id(root))),
        );
        orgs.save_all(batch).unwrap();
    }

    #[test]
    fn propagates_to_whole_subtree() {
        let fx = fixture(InMemoryFlagRepository::new(), InMemoryJobStore::new());
        fx.orgs
            .save_all(vec![
                Organization::root(id(1), "root"),
                Organization::child(id(2), "a", id(1)),
                Organization::child(id(3), "b", id(2)),
                Organization::root(id(9), "elsewhere"),
            ])
            .unwrap();
        let job = fx
            .engine
            .lifecycle()
            .create(id(1), "beta", true, 3, 3)
            .unwrap();

        let outcome = fx.engine.run(job.id).unwrap();

        assert_eq!(outcome, JobOutcome::Completed { processed: 3, total: 3 });
        let store = FlagStore::new(fx.flags.clone());
        for org in [1, 2, 3] {
            assert!(store.get(id(org), "beta").unwrap());
        }
        assert!(!store.get(id(9), "beta").unwrap());

        let stored = fx.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.processed_organizations, stored.total_organizations);
    }

    #[test]
    fn leaf_job_processes_one_organization() {
        let fx = fixture(InMemoryFlagRepository::new(), InMemoryJobStore::new());
        fx.orgs.save(Organization::root(id(4), "leaf")).unwrap();
        let job = fx.engine.lifecycle().create(id(4), "beta", false, 1, 3).unwrap();

        assert_eq!(
            fx.engine.run(job.id).unwrap(),
            JobOutcome::Completed { processed: 1, total: 1 }
        );
    }

    #[test]
    fn stale_total_is_corrected() {
        let fx = fixture(InMemoryFlagRepository::new(), InMemoryJobStore::new());
        star(&fx.orgs, 1, 2..=4);
        let job = fx.engine.lifecycle().create(id(1), "beta", true, 2, 3).unwrap();

        let outcome = fx.engine.run(job.id).unwrap();

        assert_eq!(outcome, JobOutcome::Completed { processed: 4, total: 4 });
    }

    #[test]
    fn descendant_write_failure_is_skipped() {
        let flags = RejectingFlags {
            rejected: HashSet::from([id(3)]),
            ..Default::default()
        };
        let fx = fixture(flags, InMemoryJobStore::new());
        star(&fx.orgs, 1, 2..=4);
        let job = fx.engine.lifecycle().create(id(1), "beta", true, 4, 3).unwrap();

        let outcome = fx.engine.run(job.id).unwrap();

        assert_eq!(outcome, JobOutcome::Completed { processed: 3, total: 4 });
        let stored = fx.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.processed_organizations, 3);
        assert!(fx.flags.find_by_organization_id_and_name(id(4), "beta").unwrap().is_some());
    }

    #[test]
    fn root_write_failure_fails_the_job() {
        let flags = RejectingFlags {
            rejected: HashSet::from([id(1)]),
            ..Default::default()
        };
        let fx = fixture(flags, InMemoryJobStore::new());
        star(&fx.orgs, 1, [2]);
        let job = fx.engine.lifecycle().create(id(1), "beta", true, 2, 3).unwrap();

        let outcome = fx.engine.run(job.id).unwrap();

        let JobOutcome::RetryScheduled { retry_job_id, delay } = outcome else {
            panic!("expected a retry, got {outcome:?}");
        };
        assert_eq!(delay, Duration::from_millis(2));
        let failed = fx.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Retrying);
        assert!(failed.error_message.unwrap().contains("organization 1"));
        assert_eq!(
            fx.jobs.get(retry_job_id).unwrap().unwrap().parent_job_id,
            Some(job.id)
        );
        assert!(fx.flags.find_by_organization_id_and_name(id(2), "beta").unwrap().is_none());
    }

    #[test]
    fn checkpoints_every_ten_and_at_the_end() {
        let fx = fixture(InMemoryFlagRepository::new(), CountingJobStore::default());
        star(&fx.orgs, 1, 2..=26);
        let job = fx.engine.lifecycle().create(id(1), "beta", true, 26, 3).unwrap();

        fx.engine.run(job.id).unwrap();

        // claim, checkpoints at 1 (root), 10, 20 and 26, completion
        assert_eq!(fx.jobs.updates.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn failed_completion_write_schedules_retry() {
        let fx = fixture(
            InMemoryFlagRepository::new(),
            CountingJobStore::rejecting_completions(1),
        );
        star(&fx.orgs, 1, [2, 3]);
        let job = fx.engine.lifecycle().create(id(1), "beta", true, 3, 3).unwrap();

        let outcome = fx.engine.run(job.id).unwrap();

        let JobOutcome::RetryScheduled { retry_job_id, .. } = outcome else {
            panic!("expected a retry, got {outcome:?}");
        };
        let original = fx.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(original.status, JobStatus::Retrying);
        assert_eq!(original.retry_count, 1);
        assert!(original.error_message.unwrap().contains("transient"));

        let retry = fx.jobs.get(retry_job_id).unwrap().unwrap();
        assert_eq!(retry.status, JobStatus::Pending);
        assert_eq!(retry.parent_job_id, Some(job.id));
        assert_eq!(fx.jobs.stats().unwrap().total(), 2);
    }

    #[test]
    fn failed_completion_write_without_budget_fails_the_job() {
        let fx = fixture(
            InMemoryFlagRepository::new(),
            CountingJobStore::rejecting_completions(1),
        );
        fx.orgs.save(Organization::root(id(1), "root")).unwrap();
        let job = fx.engine.lifecycle().create(id(1), "beta", true, 1, 0).unwrap();

        let outcome = fx.engine.run(job.id).unwrap();

        assert!(matches!(outcome, JobOutcome::Failed { .. }));
        let stored = fx.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.retry_count, 0);
    }

    #[test]
    fn running_a_claimed_job_is_rejected() {
        let fx = fixture(InMemoryFlagRepository::new(), InMemoryJobStore::new());
        fx.orgs.save(Organization::root(id(1), "root")).unwrap();
        let job = fx.engine.lifecycle().create(id(1), "beta", true, 1, 3).unwrap();
        fx.engine.run(job.id).unwrap();

        assert!(matches!(fx.engine.run(job.id), Err(JobError::Lifecycle(_))));
        assert_eq!(fx.jobs.stats().unwrap().total(), 1);
    }
}
