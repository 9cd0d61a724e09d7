//! Registration of organizations: single inserts and bulk ingestion.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use orgflags_core::{DomainError, OrganizationId, RepositoryError};

use crate::graph::BulkValidation;
use crate::organization::Organization;
use crate::repository::OrganizationRepository;
use crate::resolver::OrgHierarchyResolver;

pub const BULK_SUCCESS_MESSAGE: &str = "Organizations processed successfully!";
pub const BULK_CYCLE_MESSAGE: &str = "Cycle Exists!";
pub const BULK_MULTIPLE_PARENTS_MESSAGE: &str = "An organization can only have single parent!";

/// Error raised by a registration call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    /// The request was rejected (conflicting parent, invalid hierarchy).
    #[error(transparent)]
    Rejected(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Success,
    Failed,
}

/// Outcome of a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationBulkResult {
    pub status: OperationStatus,
    pub message: String,
    /// Ids persisted by the call, in first-seen order (empty on failure).
    pub org_ids: Vec<OrganizationId>,
}

impl OrganizationBulkResult {
    pub fn success(org_ids: Vec<OrganizationId>) -> Self {
        Self {
            status: OperationStatus::Success,
            message: BULK_SUCCESS_MESSAGE.to_string(),
            org_ids,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Failed,
            message: message.into(),
            org_ids: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }
}

/// Validating front door to the organization repository.
#[derive(Debug, Clone)]
pub struct OrganizationRegistry<R> {
    resolver: OrgHierarchyResolver<R>,
}

impl<R: OrganizationRepository> OrganizationRegistry<R> {
    pub fn new(repo: R) -> Self {
        Self {
            resolver: OrgHierarchyResolver::new(repo),
        }
    }

    pub fn resolver(&self) -> &OrgHierarchyResolver<R> {
        &self.resolver
    }

    pub fn get_organization(&self, id: OrganizationId) -> Result<Option<Organization>, RepositoryError> {
        self.resolver.repository().find_by_id(id)
    }

    /// Insert (or re-insert) a single organization.
    ///
    /// An organization already registered under a parent keeps it: re-inserting
    /// it with a different parent (or as a root) is a conflict.
    pub fn validate_and_insert(&self, org: Organization) -> Result<(), HierarchyError> {
        let repo = self.resolver.repository();

        if let Some(existing) = repo.find_by_id(org.id)? {
            if let Some(current_parent) = existing.parent_id {
                if org.parent_id != Some(current_parent) {
                    warn!(
                        organization_id = %org.id,
                        parent_id = %current_parent,
                        "rejected re-insert of organization already assigned to a parent"
                    );
                    return Err(DomainError::conflict(format!(
                        "organization {} is already a child of {}",
                        org.id, current_parent
                    ))
                    .into());
                }
            }
        }

        if !self.resolver.is_valid_parent_child(org.parent_id, org.id)? {
            return Err(DomainError::invalid_hierarchy(match org.parent_id {
                Some(parent) => format!("organization {} cannot be placed under {}", org.id, parent),
                None => format!("organization {} cannot be placed at the root", org.id),
            })
            .into());
        }

        info!(organization_id = %org.id, parent_id = ?org.parent_id, "organization registered");
        repo.save(org)?;
        Ok(())
    }

    /// Validate a whole batch against the tree invariants and persist it.
    ///
    /// Nothing is written unless the entire batch is valid.
    pub fn validate_and_bulk_insert(
        &self,
        orgs: Vec<Organization>,
    ) -> Result<OrganizationBulkResult, RepositoryError> {
        if orgs.is_empty() {
            return Ok(OrganizationBulkResult::success(Vec::new()));
        }

        match self.resolver.validate_bulk(&orgs)? {
            BulkValidation::Ok => {}
            BulkValidation::MultipleParents => {
                warn!(batch_size = orgs.len(), "bulk insert rejected: multiple parents");
                return Ok(OrganizationBulkResult::failed(BULK_MULTIPLE_PARENTS_MESSAGE));
            }
            BulkValidation::Cyclic => {
                warn!(batch_size = orgs.len(), "bulk insert rejected: cycle");
                return Ok(OrganizationBulkResult::failed(BULK_CYCLE_MESSAGE));
            }
        }

        let mut seen = HashSet::with_capacity(orgs.len());
        let ids: Vec<OrganizationId> = orgs
            .iter()
            .map(|org| org.id)
            .filter(|id| seen.insert(*id))
            .collect();

        self.resolver.repository().save_all(orgs)?;
        info!(count = ids.len(), "organizations ingested");
        Ok(OrganizationBulkResult::success(ids))
    }
}
