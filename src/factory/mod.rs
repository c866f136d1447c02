//! Resource factories (spec.md §4.3): two layers of polymorphism over
//! provision providers (`aws`, `cloudflare`, ...) and, within each, over
//! resource types (`rds`, `msk`, `elasticache`, ...).

pub mod aws;
pub mod cloudflare;
pub mod resolver;

use crate::error::Error;
use crate::inventory::Inventory;
use crate::model::{ExternalResourceProvision, ModuleConfiguration, Resource, ResourceKey, Spec};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// A registry of `T` keyed by an arbitrary string id, with a mandatory
/// `"default"` fallback entry. Mirrors the original implementation's
/// `ObjectFactory[T]`.
pub struct ObjectFactory<T: ?Sized> {
    entries: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> ObjectFactory<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, id: impl Into<String>, factory: Arc<T>) {
        self.entries.insert(id.into(), factory);
    }

    /// Looks up `id`, falling back to the `"default"` entry. Panics if
    /// neither exists — a registry with no default entry is a wiring bug,
    /// not a runtime condition to recover from.
    pub fn get(&self, id: &str) -> Arc<T> {
        self.entries
            .get(id)
            .or_else(|| self.entries.get("default"))
            .unwrap_or_else(|| panic!("no factory registered for '{id}' and no default factory"))
            .clone()
    }
}

impl<T: ?Sized> Default for ObjectFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-resource-type resolution and validation, registered under a
/// provision provider's `ObjectFactory`.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    /// Resolves `spec`'s resource mapping: applies defaults, dereferences
    /// cross-references, expands shortcut syntax. Returns the resolved JSON
    /// map that becomes `Resource::data`.
    async fn resolve(
        &self,
        spec: &Spec,
        module_conf: &ModuleConfiguration,
        inventory: &Inventory,
    ) -> Result<serde_json::Value, Error>;

    /// Provider-specific post-resolution checks.
    fn validate(&self, resource: &Resource, module_conf: &ModuleConfiguration) -> Result<(), Error>;

    /// Dependent resources that should be considered alongside `spec`
    /// (e.g. RDS read replicas pointing at it). Computed for observability
    /// only — see design notes on why this isn't used to drive scheduling.
    fn find_linked_resources(&self, _spec: &Spec, _inventory: &Inventory) -> BTreeSet<ResourceKey> {
        BTreeSet::new()
    }
}

/// Per-provision-provider orchestration: provider-agnostic pre-processing
/// (tagging, region selection, provision-data construction) around a
/// delegate `ResourceFactory` lookup.
#[async_trait]
pub trait ExternalResourceFactory: Send + Sync {
    async fn create_external_resource(
        &self,
        spec: &Spec,
        module_conf: &ModuleConfiguration,
        inventory: &Inventory,
    ) -> Result<Resource, Error>;

    fn validate_external_resource(
        &self,
        resource: &Resource,
        module_conf: &ModuleConfiguration,
    ) -> Result<(), Error>;

    /// Dependent resources the manager should surface alongside this spec's
    /// reconciliation, for observability only. Defaults to none; providers
    /// with resource types that track dependents (e.g. AWS RDS replicas)
    /// delegate to the matching `ResourceFactory::find_linked_resources`.
    fn find_linked_resources(&self, _spec: &Spec, _inventory: &Inventory) -> BTreeSet<ResourceKey> {
        BTreeSet::new()
    }
}

pub fn build_provision(
    spec: &Spec,
    cluster: &str,
    module_provision_data: crate::model::ModuleProvisionData,
) -> ExternalResourceProvision {
    ExternalResourceProvision {
        key: spec.key(),
        cluster: cluster.to_string(),
        namespace: spec
            .namespace()
            .map(|n| n.name.clone())
            .unwrap_or_default(),
        provider: spec.provider.clone(),
        provisioner_name: spec.provisioner.name.clone(),
        identifier: spec.identifier.clone(),
        target_secret_name: spec.output_resource_name(),
        module_provision_data,
    }
}
