use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use orgflags_core::{OrganizationId, RepositoryError};

use crate::assignment::{FeatureFlagAssignment, FlagKey};

/// Flag persistence.
///
/// `save` is an upsert keyed by `(organization_id, name)`. Concurrent saves of
/// the same key are last-write-wins; no ordering is promised beyond that.
pub trait FlagRepository: Send + Sync {
    fn find_by_organization_id_and_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Option<FeatureFlagAssignment>, RepositoryError>;

    fn save(&self, assignment: FeatureFlagAssignment) -> Result<(), RepositoryError>;

    fn count(&self) -> Result<usize, RepositoryError>;
}

impl<S> FlagRepository for Arc<S>
where
    S: FlagRepository + ?Sized,
{
    fn find_by_organization_id_and_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Option<FeatureFlagAssignment>, RepositoryError> {
        (**self).find_by_organization_id_and_name(organization_id, name)
    }

    fn save(&self, assignment: FeatureFlagAssignment) -> Result<(), RepositoryError> {
        (**self).save(assignment)
    }

    fn count(&self) -> Result<usize, RepositoryError> {
        (**self).count()
    }
}

/// In-memory flag store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryFlagRepository {
    inner: RwLock<HashMap<FlagKey, FeatureFlagAssignment>>,
}

impl InMemoryFlagRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> RepositoryError {
    RepositoryError::unavailable("flag store lock poisoned")
}

impl FlagRepository for InMemoryFlagRepository {
    fn find_by_organization_id_and_name(
        &self,
        organization_id: OrganizationId,
        name: &str,
    ) -> Result<Option<FeatureFlagAssignment>, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(&FlagKey::new(organization_id, name)).cloned())
    }

    fn save(&self, assignment: FeatureFlagAssignment) -> Result<(), RepositoryError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert(assignment.key(), assignment);
        Ok(())
    }

    fn count(&self) -> Result<usize, RepositoryError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.len())
    }
}
