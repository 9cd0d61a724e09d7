//! Background propagation jobs.
//!
//! ## Components
//!
//! - `FeatureFlagJob`: one tracked propagation attempt and its state machine
//! - `JobStore`: persistence for jobs
//! - `JobLifecycleManager`: persisted transitions and progress checkpoints
//! - `PropagationExecutor`: fan-out of a flag value over a subtree
//! - `RetryScheduler`: linked retry jobs with exponential backoff
//! - `JobExecutor`: worker pool plus delay queue that runs jobs by id

pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod propagation;
pub mod retry;
pub mod store;
pub mod types;

pub use error::JobError;
pub use executor::{ExecutorStats, JobExecutor, JobExecutorHandle, JobQueue, QueueClosed};
pub use lifecycle::JobLifecycleManager;
pub use propagation::PropagationExecutor;
pub use retry::RetryScheduler;
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{FeatureFlagJob, JobOutcome, JobStatus, RetryPolicy};
