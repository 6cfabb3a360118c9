use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant's storage ceiling and current consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaAccount {
    pub tenant_id: Uuid,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub updated_at: DateTime<Utc>,
}

impl QuotaAccount {
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }

    /// Whether `incoming_bytes` more would still fit under the ceiling.
    pub fn fits(&self, incoming_bytes: u64) -> bool {
        self.used_bytes
            .checked_add(incoming_bytes)
            .is_some_and(|after| after <= self.total_bytes)
    }
}

/// A named storage plan; assigning it overwrites a tenant's ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub total_bytes: u64,
}

impl Plan {
    pub fn new(name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            name: name.into(),
            total_bytes,
        }
    }

    /// Plan sized in whole gibibytes.
    pub fn from_gib(name: impl Into<String>, gib: u64) -> Self {
        Self::new(name, gib.saturating_mul(crate::constants::GIB))
    }
}
