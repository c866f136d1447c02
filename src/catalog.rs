//! The catalog query contract this crate consumes. The concrete GraphQL
//! client lives outside this crate's scope (spec §6.1 — "out of scope");
//! this trait is the narrow seam it's expected to implement.

use crate::model::{Module, Namespace};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// One `(provision_provider, provider)` block's declared resources under a
/// namespace's `external_resources` list.
#[derive(Debug, Clone)]
pub struct ExternalResourceBlock {
    pub provision_provider: String,
    pub resources: Vec<Value>,
}

/// A namespace as declared in the catalog, carrying the raw provider
/// blocks that `inventory::build` turns into `Spec`s.
#[derive(Debug, Clone)]
pub struct CatalogNamespace {
    pub namespace: Namespace,
    pub external_resources: Vec<ExternalResourceBlock>,
}

/// Settings sourced from the catalog (state-store table/account, worker
/// cluster/namespace, default images) — overridable by `config::Settings`
/// but authoritative when not overridden.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub state_table_name: String,
    pub state_account_name: String,
    pub workers_cluster: String,
    pub workers_namespace: String,
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn get_namespaces(&self) -> Result<Vec<CatalogNamespace>>;
    async fn get_modules(&self) -> Result<Vec<Module>>;
    async fn get_settings(&self) -> Result<CatalogSettings>;
}

/// A single `(provision_provider, provider)` pair, mirroring the module
/// inventory's lookup key.
pub fn module_key(provision_provider: &str, provider: &str) -> (String, String) {
    (provision_provider.to_string(), provider.to_string())
}
