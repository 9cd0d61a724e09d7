use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orgflags_core::OrganizationId;

/// Storage key of a flag assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagKey {
    pub organization_id: OrganizationId,
    pub name: String,
}

impl FlagKey {
    pub fn new(organization_id: OrganizationId, name: impl Into<String>) -> Self {
        Self {
            organization_id,
            name: name.into(),
        }
    }
}

/// The value of one flag for one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlagAssignment {
    pub organization_id: OrganizationId,
    pub name: String,
    pub enabled: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeatureFlagAssignment {
    pub fn new(organization_id: OrganizationId, name: impl Into<String>, enabled: bool) -> Self {
        let now = Utc::now();
        Self {
            organization_id,
            name: name.into(),
            enabled,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> FlagKey {
        FlagKey::new(self.organization_id, self.name.clone())
    }
}
