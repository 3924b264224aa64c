use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

/// Optimistic-concurrency counter stored next to every balance.
pub type Version = i64;

/// Version assigned to a freshly created account row.
pub const INITIAL_VERSION: Version = 1;

/// Opaque, immutable account identity.
///
/// Player accounts use the hyphenated UUID; plugins are free to use any
/// other stable string (e.g. `"server:bank"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the id back into a UUID when it is one.
    pub fn as_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.0).ok()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for AccountId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.hyphenated().to_string())
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One row of the `accounts` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: AccountId,
    pub name: Option<String>,
    pub balance: Cents,
    pub version: Version,
    pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
    pub fn new(id: AccountId, name: Option<String>, balance: Cents) -> Self {
        Self {
            id,
            name,
            balance,
            version: INITIAL_VERSION,
            updated_at: Utc::now(),
        }
    }

    /// Name shown to players; falls back to the id when no name is known.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Copy of this record after a committed balance write.
    pub fn with_balance(&self, balance: Cents, version: Version) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            balance,
            version,
            updated_at: Utc::now(),
        }
    }
}
