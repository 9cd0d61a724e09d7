//! `orgflags-hierarchy`: the organization tree.
//!
//! Organizations form a forest: every organization has at most one parent and
//! following parent links never revisits a node. This crate owns that model,
//! the repository seam used to read and write it, and the checks that keep
//! both invariants true on single and bulk inserts.

pub mod graph;
pub mod organization;
pub mod registry;
pub mod repository;
pub mod resolver;

pub use graph::{BulkValidation, ParentGraph};
pub use organization::Organization;
pub use registry::{
    BULK_CYCLE_MESSAGE, BULK_MULTIPLE_PARENTS_MESSAGE, BULK_SUCCESS_MESSAGE, HierarchyError,
    OperationStatus, OrganizationBulkResult, OrganizationRegistry,
};
pub use repository::{InMemoryOrganizationRepository, OrganizationRepository};
pub use resolver::OrgHierarchyResolver;
