//! Per-key state record: the durable, crash-recoverable record of a
//! resource's lifecycle.

use crate::model::reconciliation::Reconciliation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    NotExists,
    InProgress,
    DeleteInProgress,
    Created,
    Deleted,
    PendingSecretSync,
    Error,
    ReconciliationRequested,
    Abandoned,
}

impl ResourceStatus {
    pub fn does_not_exist(self) -> bool {
        matches!(self, ResourceStatus::NotExists)
    }

    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            ResourceStatus::InProgress | ResourceStatus::DeleteInProgress
        )
    }

    pub fn needs_secret_sync(self) -> bool {
        matches!(self, ResourceStatus::PendingSecretSync)
    }

    pub fn has_errors(self) -> bool {
        matches!(self, ResourceStatus::Error)
    }
}

/// The durable record for a single `ResourceKey`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    pub resource_status: ResourceStatus,
    pub ts: DateTime<Utc>,
    pub reconciliation: Option<Reconciliation>,
    pub reconciliation_errors: u32,
}

impl StateRecord {
    /// The synthetic record returned for a key with no stored state.
    pub fn not_exists(now: DateTime<Utc>) -> Self {
        Self {
            resource_status: ResourceStatus::NotExists,
            ts: now,
            reconciliation: None,
            reconciliation_errors: 0,
        }
    }
}
