//! The durable state store contract (spec.md §4.1).

pub mod dynamodb;

use crate::model::{ResourceKey, ResourceStatus, StateRecord};
use anyhow::Result;
use async_trait::async_trait;

/// `{key, status, hash}` projection used for the per-loop partial scan —
/// narrow enough to amortize a full-table sweep.
#[derive(Debug, Clone)]
pub struct PartialRecord {
    pub key: ResourceKey,
    pub status: ResourceStatus,
    pub resource_hash: Option<String>,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Strongly consistent (read-your-writes) read. Returns a synthetic
    /// `NOT_EXISTS` record if no item is stored for `key`.
    async fn get(&self, key: &ResourceKey) -> Result<StateRecord>;

    /// Idempotent whole-record upsert.
    async fn put(&self, key: &ResourceKey, record: &StateRecord) -> Result<()>;

    /// No-op if no record exists for `key`.
    async fn delete(&self, key: &ResourceKey) -> Result<()>;

    /// `{key,status,hash}` projection over every stored record, scanned
    /// fresh on every call (see SPEC_FULL.md §4.1 — not cached across
    /// invocations).
    async fn scan_partial(&self) -> Result<Vec<PartialRecord>>;

    /// Convenience filter over `scan_partial`.
    async fn keys_by_status(&self, status: ResourceStatus) -> Result<Vec<ResourceKey>> {
        Ok(self
            .scan_partial()
            .await?
            .into_iter()
            .filter(|r| r.status == status)
            .map(|r| r.key)
            .collect())
    }

    /// Atomic partial update of only `resource_status`.
    async fn update_status(&self, key: &ResourceKey, status: ResourceStatus) -> Result<()>;
}
