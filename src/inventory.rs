//! Inventory assembly (spec.md §4.2): turns the catalog's namespace list
//! into a flat, deduplicated map of `ResourceKey -> Spec`, expanding
//! namespace selectors along the way.

use crate::catalog::CatalogNamespace;
use crate::model::{RawResource, ResourceKey, Spec};
use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// The assembled inventory: every currently declared external resource,
/// keyed by its globally unique `ResourceKey`.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    specs: BTreeMap<ResourceKey, Spec>,
}

impl Inventory {
    pub fn items(&self) -> impl Iterator<Item = (&ResourceKey, &Spec)> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Spec> {
        self.specs.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.specs.keys()
    }

    /// Cross-reference lookup used by factories resolving `replica_source`,
    /// KMS key references, and similar same-inventory pointers.
    pub fn get_by(
        &self,
        provision_provider: &str,
        provisioner_name: &str,
        provider: &str,
        identifier: &str,
    ) -> Option<&Spec> {
        let key = ResourceKey::new(provision_provider, provisioner_name, provider, identifier);
        self.get(&key)
    }

    /// Builds the inventory from the catalog's namespace list.
    ///
    /// Order (spec.md §4.2): for every namespace, for every declared
    /// provider block, for every resource in the block — skip resources
    /// whose `managed_by_erv2` is false, attach delete/module_overrides
    /// metadata, expand namespace selectors, then insert. A duplicate
    /// `ResourceKey` surfacing here is a programmer error in the catalog
    /// and is treated as fatal, not skipped.
    pub fn build(namespaces: &[CatalogNamespace]) -> Result<Self> {
        let all_namespaces: Vec<_> = namespaces.iter().map(|n| n.namespace.clone()).collect();
        let mut specs = BTreeMap::new();

        for ns in namespaces {
            for block in &ns.external_resources {
                for raw in &block.resources {
                    let mut raw: RawResource = serde_json::from_value(raw.clone())?;
                    if !raw.resource.get("managed_by_erv2").and_then(|v| v.as_bool()).unwrap_or(true) {
                        continue;
                    }
                    if let Value::Object(map) = &mut raw.resource {
                        map.remove("managed_by_erv2");
                    }
                    let spec = raw.into_spec(&block.provision_provider, &ns.namespace);

                    for expanded in spec.expand_namespaces(&all_namespaces)? {
                        let key = expanded.key();
                        if specs.insert(key.clone(), expanded).is_some() {
                            bail!("duplicate resource key in inventory: {key}");
                        }
                    }
                }
            }
        }

        Ok(Self { specs })
    }
}
