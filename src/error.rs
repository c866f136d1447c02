//! # Error Taxonomy
//!
//! The error types a manager loop invocation can produce. `ValidationError`
//! and its specializations are soft failures: the offending spec is skipped
//! and the loop continues. `OrphanedResourcesError` and `TransientStoreError`
//! abort the current loop invocation.

use crate::model::key::ResourceKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A factory's `validate` rejected a resolved resource. The spec is
    /// skipped for this loop invocation; the manager records it and
    /// continues with the rest of the inventory.
    #[error("validation failed for {key}: {message}")]
    Validation { key: ResourceKey, message: String },

    /// A secret referenced by a spec was missing required fields.
    #[error("secret for {key} is missing required fields: {message}")]
    SecretIncomplete { key: ResourceKey, message: String },

    /// A cross-reference (e.g. RDS replica_source, KMS key) didn't resolve.
    #[error("cross-reference from {key} did not resolve: {message}")]
    FetchResource { key: ResourceKey, message: String },

    /// State records exist in the store with no corresponding spec in the
    /// inventory. Fatal for the loop: operators must add `delete=true`
    /// specs for these keys.
    #[error("orphaned resources found with no matching spec: {0:?}")]
    OrphanedResources(Vec<ResourceKey>),

    /// A dispatched job reported `ERROR` or vanished (`NOT_EXISTS`).
    #[error("job for {key} reported an error")]
    Job { key: ResourceKey },

    /// A dry run completed with at least one reconciliation in error, or at
    /// least one spec that failed validation. Non-zero exit for the dry-run
    /// entry point; never raised in live mode.
    #[error("dry run failed for: {0:?}")]
    DryRunFailed(Vec<ResourceKey>),

    /// The state store call itself failed (network, throttling, auth).
    /// Bubbles up and aborts the current loop invocation; state is left
    /// consistent since every write except `update_status` is whole-record.
    #[error("state store call failed: {0}")]
    TransientStore(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(key: ResourceKey, message: impl Into<String>) -> Self {
        Error::Validation {
            key,
            message: message.into(),
        }
    }

    pub fn secret_incomplete(key: ResourceKey, message: impl Into<String>) -> Self {
        Error::SecretIncomplete {
            key,
            message: message.into(),
        }
    }

    pub fn fetch_resource(key: ResourceKey, message: impl Into<String>) -> Self {
        Error::FetchResource {
            key,
            message: message.into(),
        }
    }

    /// Whether this error represents a validation-class failure that should
    /// be captured per-key and allow the loop to continue, as opposed to an
    /// abort-the-loop failure.
    pub fn is_validation_class(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. } | Error::SecretIncomplete { .. } | Error::FetchResource { .. }
        )
    }
}
