//! Typed resource records.

use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// One distributable resource and who, if anyone, holds it.
///
/// A record with a claimant only changes through a release that clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// The opaque payload handed to the requester (usually a URL).
    pub value: String,

    /// The requester holding this resource. `None` means unclaimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimant: Option<UserId>,
}

impl ResourceRecord {
    /// Creates an unclaimed record.
    pub fn unclaimed(value: impl Into<String>) -> Self {
        ResourceRecord {
            value: value.into(),
            claimant: None,
        }
    }

    /// Creates a record already held by `claimant`.
    pub fn claimed(value: impl Into<String>, claimant: UserId) -> Self {
        ResourceRecord {
            value: value.into(),
            claimant: Some(claimant),
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.claimant.is_some()
    }

    /// Returns true if `requester` holds this record.
    pub fn is_held_by(&self, requester: &UserId) -> bool {
        self.claimant.as_ref() == Some(requester)
    }
}

/// Pool counters, exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub claimed: usize,
    pub unclaimed: usize,
}

impl PoolStats {
    pub fn from_records(records: &[ResourceRecord]) -> Self {
        let claimed = records.iter().filter(|r| r.is_claimed()).count();
        PoolStats {
            total: records.len(),
            claimed,
            unclaimed: records.len() - claimed,
        }
    }
}
