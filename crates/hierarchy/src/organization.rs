use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orgflags_core::{Entity, OrganizationId};

/// A node in the organization forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub parent_id: Option<OrganizationId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// A top-level organization (no parent).
    pub fn root(id: OrganizationId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            parent_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// An organization placed under `parent_id`.
    pub fn child(id: OrganizationId, name: impl Into<String>, parent_id: OrganizationId) -> Self {
        Self::root(id, name).with_parent(Some(parent_id))
    }

    pub fn with_parent(mut self, parent_id: Option<OrganizationId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

impl Entity for Organization {
    type Id = OrganizationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
