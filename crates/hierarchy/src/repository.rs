//! Organization storage seam.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use chrono::Utc;

use orgflags_core::{OrganizationId, RepositoryError};

use crate::organization::Organization;

/// Tree data source.
///
/// Writes are last-write-wins per organization id: `save` replaces whatever
/// was stored for that id, including its parent link.
pub trait OrganizationRepository: Send + Sync {
    fn find_by_id(&self, id: OrganizationId) -> Result<Option<Organization>, RepositoryError>;

    /// Direct children of `parent_id`.
    fn find_by_parent_id(
        &self,
        parent_id: OrganizationId,
    ) -> Result<Vec<Organization>, RepositoryError>;

    /// Every stored organization whose id is in `ids`; unknown ids are skipped.
    fn find_all_by_id(&self, ids: &[OrganizationId]) -> Result<Vec<Organization>, RepositoryError>;

    fn save(&self, org: Organization) -> Result<(), RepositoryError>;

    fn save_all(&self, orgs: Vec<Organization>) -> Result<(), RepositoryError>;

    fn count(&self) -> Result<usize, RepositoryError>;
}

impl<S> OrganizationRepository for Arc<S>
where
    S: OrganizationRepository + ?Sized,
{
    fn find_by_id(&self, id: OrganizationId) -> Result<Option<Organization>, RepositoryError> {
        (**self).find_by_id(id)
    }

    fn find_by_parent_id(
        &self,
        parent_id: OrganizationId,
    ) -> Result<Vec<Organization>, RepositoryError> {
        (**self).find_by_parent_id(parent_id)
    }

    fn find_all_by_id(&self, ids: &[OrganizationId]) -> Result<Vec<Organization>, RepositoryError> {
        (**self).find_all_by_id(ids)
    }

    fn save(&self, org: Organization) -> Result<(), RepositoryError> {
        (**self).save(org)
    }

    fn save_all(&self, orgs: Vec<Organization>) -> Result<(), RepositoryError> {
        (**self).save_all(orgs)
    }

    fn count(&self) -> Result<usize, RepositoryError> {
        (**self).count()
    }
}

#[derive(Debug, Default)]
struct Inner {
    orgs: HashMap<OrganizationId, Organization>,
    // parent -> direct children, kept in step with `orgs`
    children: HashMap<OrganizationId, BTreeSet<OrganizationId>>,
}

impl Inner {
    fn upsert(&mut self, mut org: Organization) {
        if let Some(previous) = self.orgs.get(&org.id) {
            org.created_at = previous.created_at;
            if let Some(old_parent) = previous.parent_id {
                if let Some(siblings) = self.children.get_mut(&old_parent) {
                    siblings.remove(&org.id);
                }
            }
        }
        org.updated_at = Utc::now();

        if let Some(parent) = org.parent_id {
            self.children.entry(parent).or_default().insert(org.id);
        }
        self.orgs.insert(org.id, org);
    }
}

/// In-memory organization store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrganizationRepository {
    inner: RwLock<Inner>,
}

impl InMemoryOrganizationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> RepositoryError {
    RepositoryError::unavailable("organization store lock poisoned")
}

impl OrganizationRepository for InMemoryOrganizationRepository {
    fn find_by_id(&self, id: OrganizationId) -> Result<Option<Organization>, RepositoryError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.orgs.get(&id).cloned())
    }

    fn find_by_parent_id(
        &self,
        parent_id: OrganizationId,
    ) -> Result<Vec<Organization>, RepositoryError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let Some(children) = inner.children.get(&parent_id) else {
            return Ok(Vec::new());
        };
        Ok(children
            .iter()
            .filter_map(|id| inner.orgs.get(id).cloned())
            .collect())
    }

    fn find_all_by_id(&self, ids: &[OrganizationId]) -> Result<Vec<Organization>, RepositoryError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(ids.iter().filter_map(|id| inner.orgs.get(id).cloned()).collect())
    }

    fn save(&self, org: Organization) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        inner.upsert(org);
        Ok(())
    }

    fn save_all(&self, orgs: Vec<Organization>) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        for org in orgs {
            inner.upsert(org);
        }
        Ok(())
    }

    fn count(&self) -> Result<usize, RepositoryError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.orgs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: i64) -> OrganizationId {
        OrganizationId::new(v)
    }

    #[test]
    fn children_index_follows_reparenting() {
        let repo = InMemoryOrganizationRepository::new();
        repo.save_all(vec![
            Organization::root(id(1), "a"),
            Organization::root(id(2), "b"),
            Organization::child(id(3), "c", id(1)),
        ])
        .unwrap();

        assert_eq!(repo.find_by_parent_id(id(1)).unwrap().len(), 1);

        repo.save(Organization::child(id(3), "c", id(2))).unwrap();

        assert!(repo.find_by_parent_id(id(1)).unwrap().is_empty());
        let under_b = repo.find_by_parent_id(id(2)).unwrap();
        assert_eq!(under_b.len(), 1);
        assert_eq!(under_b[0].id, id(3));
        assert_eq!(repo.count().unwrap(), 3);
    }

    #[test]
    fn resave_keeps_creation_time() {
        let repo = InMemoryOrganizationRepository::new();
        repo.save(Organization::root(id(1), "first")).unwrap();
        let created = repo.find_by_id(id(1)).unwrap().unwrap().created_at;

        repo.save(Organization::root(id(1), "renamed")).unwrap();
        let stored = repo.find_by_id(id(1)).unwrap().unwrap();

        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.created_at, created);
    }

    #[test]
    fn find_all_by_id_skips_unknown() {
        let repo = InMemoryOrganizationRepository::new();
        repo.save(Organization::root(id(1), "a")).unwrap();

        let found = repo.find_all_by_id(&[id(1), id(99)]).unwrap();
        assert_eq!(found.len(), 1);
    }
}
