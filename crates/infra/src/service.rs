//! Public entry point: flag reads and writes, job queries, registration.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info};

use orgflags_core::{JobId, OrganizationId};
use orgflags_flags::{FlagRepository, FlagStore, InMemoryFlagRepository};
use orgflags_hierarchy::{
    InMemoryOrganizationRepository, Organization, OrganizationBulkResult, OrganizationRegistry,
    OrganizationRepository,
};

use crate::config::PropagationConfig;
use crate::error::ServiceError;
use crate::health::HealthReport;
use crate::jobs::{
    ExecutorStats, FeatureFlagJob, InMemoryJobStore, JobError, JobExecutor, JobExecutorHandle,
    JobLifecycleManager, JobQueue, JobStore, PropagationExecutor, RetryScheduler,
};

/// How a flag change was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagUpdate {
    /// The organization has no children; the value is already stored.
    Immediate,
    /// A propagation job was queued for the subtree.
    Background { job_id: JobId },
}

/// Service over in-memory repositories.
pub type InMemoryFeatureFlagService = FeatureFlagService<
    Arc<InMemoryOrganizationRepository>,
    Arc<InMemoryFlagRepository>,
    Arc<InMemoryJobStore>,
>;

/// Feature flags over an organization hierarchy.
///
/// Owns the propagation worker pool; it is stopped by
/// [`FeatureFlagService::shutdown`] or when the service is dropped.
pub struct FeatureFlagService<O, F, S> {
    registry: OrganizationRegistry<O>,
    flags: FlagStore<F>,
    engine: Arc<PropagationExecutor<O, F, S>>,
    queue: JobQueue,
    executor: Mutex<Option<JobExecutorHandle>>,
    config: PropagationConfig,
}

impl InMemoryFeatureFlagService {
    pub fn in_memory(config: PropagationConfig) -> Self {
        Self::new(
            InMemoryOrganizationRepository::arc(),
            InMemoryFlagRepository::arc(),
            InMemoryJobStore::arc(),
            config,
        )
    }
}

impl<O, F, S> FeatureFlagService<O, F, S>
where
    O: OrganizationRepository + Clone + 'static,
    F: FlagRepository + Clone + 'static,
    S: JobStore + Clone + 'static,
{
    /// Wire the components and start the worker pool.
    pub fn new(organizations: O, flags: F, jobs: S, config: PropagationConfig) -> Self {
        let (executor, queue) = JobExecutor::new(&config);
        let lifecycle = JobLifecycleManager::new(jobs, config.checkpoint_interval);
        let retry = RetryScheduler::new(lifecycle.clone(), config.retry_policy(), queue.clone());
        let registry = OrganizationRegistry::new(organizations);
        let engine = Arc::new(PropagationExecutor::new(
            registry.resolver().clone(),
            FlagStore::new(flags.clone()),
            lifecycle,
            retry,
        ));

        let worker_engine = engine.clone();
        let handle = executor.spawn(move |job_id| worker_engine.run(job_id));

        Self {
            registry,
            flags: FlagStore::new(flags),
            engine,
            queue,
            executor: Mutex::new(Some(handle)),
            config,
        }
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    pub fn get_flag(&self, organization_id: OrganizationId, name: &str) -> Result<bool, ServiceError> {
        Ok(self.flags.get(organization_id, name)?)
    }

    /// Write the value for this organization only.
    pub fn set_flag(&self, organization_id: OrganizationId, name: &str, enabled: bool) -> Result<(), ServiceError> {
        self.flags.set(organization_id, name, enabled)?;
        info!(organization_id = %organization_id, flag = name, enabled, "flag set");
        Ok(())
    }

    pub fn set_flag_with_description(
        &self,
        organization_id: OrganizationId,
        name: &str,
        enabled: bool,
        description: &str,
    ) -> Result<(), ServiceError> {
        self.flags
            .set_with_description(organization_id, name, enabled, description)?;
        Ok(())
    }

    /// Queue a job writing the value to the organization and all its descendants.
    ///
    /// Returns once the job is recorded; the fan-out happens on the pool.
    pub fn set_flag_with_hierarchy(
        &self,
        organization_id: OrganizationId,
        name: &str,
        enabled: bool,
    ) -> Result<JobId, ServiceError> {
        if self.registry.get_organization(organization_id)?.is_none() {
            return Err(ServiceError::NotFound(format!(
                "Organization not found: {organization_id}"
            )));
        }

        let descendants = self.registry.resolver().descendant_ids(organization_id)?;
        let lifecycle = self.engine.lifecycle();
        let mut job = lifecycle.create(
            organization_id,
            name,
            enabled,
            descendants.len() + 1,
            self.config.max_retries,
        )?;

        if self.queue.submit(job.id).is_err() {
            let cause = JobError::QueueClosed(job.id);
            error!(job_id = %job.id, error = %cause, "propagation job not dispatched");
            lifecycle.fail(&mut job, &cause.to_string())?;
            return Err(cause.into());
        }
        Ok(job.id)
    }

    /// Apply a flag change, fanning out only when the organization has children.
    pub fn update_flag(
        &self,
        organization_id: OrganizationId,
        name: &str,
        enabled: bool,
    ) -> Result<FlagUpdate, ServiceError> {
        if self.organization_has_children(organization_id)? {
            let job_id = self.set_flag_with_hierarchy(organization_id, name, enabled)?;
            Ok(FlagUpdate::Background { job_id })
        } else {
            self.set_flag(organization_id, name, enabled)?;
            Ok(FlagUpdate::Immediate)
        }
    }

    pub fn organization_has_children(&self, organization_id: OrganizationId) -> Result<bool, ServiceError> {
        Ok(self.registry.resolver().has_descendants(organization_id)?)
    }

    pub fn get_job_status(&self, job_id: JobId) -> Result<FeatureFlagJob, ServiceError> {
        Ok(self.engine.lifecycle().load(job_id)?)
    }

    /// Jobs rooted at the organization, newest first.
    pub fn get_jobs_for_organization(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<FeatureFlagJob>, ServiceError> {
        Ok(self
            .engine
            .lifecycle()
            .store()
            .list_for_organization(organization_id)?)
    }

    /// Retry a FAILED job as a new linked job with one extra retry allowed.
    pub fn retry_failed_job(&self, job_id: JobId) -> Result<JobId, ServiceError> {
        let retry = self.engine.retry_scheduler().manual_retry(job_id)?;
        Ok(retry.id)
    }

    /// First job of the chain followed by its retries, oldest first.
    pub fn get_job_retry_chain(&self, job_id: JobId) -> Result<Vec<FeatureFlagJob>, ServiceError> {
        Ok(self.engine.retry_scheduler().retry_chain(job_id)?)
    }

    pub fn get_organization(&self, id: OrganizationId) -> Result<Option<Organization>, ServiceError> {
        Ok(self.registry.get_organization(id)?)
    }

    pub fn validate_and_insert(&self, organization: Organization) -> Result<(), ServiceError> {
        Ok(self.registry.validate_and_insert(organization)?)
    }

    pub fn validate_and_bulk_insert(
        &self,
        organizations: Vec<Organization>,
    ) -> Result<OrganizationBulkResult, ServiceError> {
        Ok(self.registry.validate_and_bulk_insert(organizations)?)
    }

    pub fn health(&self) -> HealthReport {
        let mut report = HealthReport::up();
        report.probe("organizations", self.registry.resolver().repository().count());
        report.probe("flags", self.flags.repository().count());

        match self.engine.lifecycle().store().stats() {
            Ok(stats) => {
                report.detail("jobs", stats.total());
                report.detail("jobs.in_progress", stats.in_progress);
                report.detail("jobs.failed", stats.failed);
            }
            Err(e) => report.fail("jobs", e),
        }

        match self.executor_stats() {
            Some(stats) => report.detail("executor.running", stats.current_running),
            None => report.fail("executor", "shut down"),
        }
        report
    }
}

impl<O, F, S> FeatureFlagService<O, F, S> {
    /// Runtime counters of the worker pool; `None` once shut down.
    pub fn executor_stats(&self) -> Option<ExecutorStats> {
        self.executor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(JobExecutorHandle::stats)
    }

    /// Stop the worker pool, waiting for running jobs. Idempotent.
    pub fn shutdown(&self) {
        let handle = self
            .executor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            info!(executor = %self.config.name, "shutting down propagation executor");
            handle.shutdown();
        }
    }
}

impl<O, F, S> Drop for FeatureFlagService<O, F, S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
