//! `orgflags-flags`: denormalized per-organization feature flag storage.
//!
//! Every `(organization, flag)` pair has its own record. Hierarchy is not
//! modelled here: propagating a value down a subtree writes one record per
//! organization.

pub mod assignment;
pub mod repository;
pub mod store;

pub use assignment::{FeatureFlagAssignment, FlagKey};
pub use repository::{FlagRepository, InMemoryFlagRepository};
pub use store::FlagStore;
