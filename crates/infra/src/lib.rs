//! Propagation engine, job bookkeeping and the service facade.

pub mod config;
pub mod error;
pub mod health;
pub mod jobs;
pub mod service;


pub use config::PropagationConfig;
pub use error::ServiceError;
pub use health::{HealthReport, HealthStatus};
pub use service::{FeatureFlagService, FlagUpdate, InMemoryFeatureFlagService};
