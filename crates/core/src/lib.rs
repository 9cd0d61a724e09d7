//! `orgflags-core`: shared building blocks for organization feature flags.
//!
//! This crate holds **pure domain** primitives only: identifiers, the entity
//! trait, and the error model. Storage and execution live in other crates.

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult, RepositoryError};
pub use id::{JobId, OrganizationId};
