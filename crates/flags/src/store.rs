use chrono::Utc;
use tracing::debug;

use orgflags_core::{OrganizationId, RepositoryError};

use crate::assignment::FeatureFlagAssignment;
use crate::repository::FlagRepository;

/// Get/set access to flag values with create-if-absent semantics.
///
/// `set` is an overwrite, so applying the same value twice is the same as
/// applying it once.
#[derive(Debug, Clone)]
pub struct FlagStore<R> {
    repo: R,
}

impl<R: FlagRepository> FlagStore<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Current value; `false` when the flag was never set for the organization.
    pub fn get(&self, organization_id: OrganizationId, name: &str) -> Result<bool, RepositoryError> {
        Ok(self
            .repo
            .find_by_organization_id_and_name(organization_id, name)?
            .is_some_and(|a| a.enabled))
    }

    pub fn find(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Option<FeatureFlagAssignment>, RepositoryError> {
        self.repo.find_by_organization_id_and_name(organization_id, name)
    }

    /// Create or overwrite the value, keeping any stored description.
    pub fn set(
        &self,
        organization_id: OrganizationId,
        name: &str,
        enabled: bool,
    ) -> Result<(), RepositoryError> {
        self.write(organization_id, name, enabled, None)
    }

    /// Create or overwrite the value and replace the description.
    pub fn set_with_description(
        &self,
        organization_id: OrganizationId,
        name: &str,
        enabled: bool,
        description: impl Into<String>,
    ) -> Result<(), RepositoryError> {
        self.write(organization_id, name, enabled, Some(description.into()))
    }

    fn write(
        &self,
        organization_id: OrganizationId,
        name: &str,
        enabled: bool,
        description: Option<String>,
    ) -> Result<(), RepositoryError> {
        let mut assignment = self
            .repo
            .find_by_organization_id_and_name(organization_id, name)?
            .unwrap_or_else(|| FeatureFlagAssignment::new(organization_id, name, enabled));

        assignment.enabled = enabled;
        if description.is_some() {
            assignment.description = description;
        }
        assignment.updated_at = Utc::now();

        self.repo.save(assignment)?;
        debug!(organization_id = %organization_id, flag = name, enabled, "flag stored");
        Ok(())
    }
}
