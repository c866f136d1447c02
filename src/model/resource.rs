//! Resolved `Resource`: what a factory produces from a `Spec`, ready to be
//! serialized into a `Reconciliation.input` and hashed for change detection.

use crate::model::key::ResourceKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provision-backend-specific data a module container needs to manage its
/// own state (e.g. a Terraform state backend location). Modeled as an enum
/// rather than a trait object since the only provision backend this crate
/// ships is Terraform; new variants are cheap to add as other backends
/// appear (CDKTF, Pulumi, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModuleProvisionData {
    Terraform {
        tf_state_bucket: String,
        tf_state_region: String,
        tf_state_dynamodb_table: String,
        tf_state_key: String,
    },
}

impl ModuleProvisionData {
    /// Builds the standard Terraform provision data for a key, deriving the
    /// state key from the key's textual path the way the original
    /// implementation's `TerraformModuleProvisionDataFactory` does.
    pub fn terraform_for_key(key: &ResourceKey, bucket: &str, region: &str, table: &str) -> Self {
        ModuleProvisionData::Terraform {
            tf_state_bucket: bucket.to_string(),
            tf_state_region: region.to_string(),
            tf_state_dynamodb_table: table.to_string(),
            tf_state_key: format!("{}/terraform.tfstate", key.state_path()),
        }
    }
}

/// The envelope around a resolved resource's data: identity, target
/// dispatch location, and the provision backend's own bookkeeping data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalResourceProvision {
    pub key: ResourceKey,
    pub cluster: String,
    pub namespace: String,
    pub provider: String,
    pub provisioner_name: String,
    pub identifier: String,
    pub target_secret_name: String,
    pub module_provision_data: ModuleProvisionData,
}

/// A fully resolved resource: the factory's output, ready for hashing and
/// dispatch. `data` never contains the `delete`/`managed_by_erv2`
/// management flags — those are spec-level metadata. `managed_by_erv2` is
/// stripped from the raw resource map at inventory-build time
/// (`Inventory::build`), before a `RawResource` even becomes a `Spec`;
/// `delete` lives on `Metadata`, never on `resource`, so it has nothing to
/// strip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub data: Value,
    pub provision: ExternalResourceProvision,
}

impl Resource {
    /// Content hash: md5 hex digest of the JSON-sorted-keys serialization of
    /// `data` only (the provision envelope is dispatch plumbing, not part of
    /// the resource's change-detection fingerprint).
    pub fn hash(&self) -> String {
        let sorted = sorted_keys_json(&self.data);
        format!("{:x}", md5::compute(sorted.as_bytes()))
    }

    /// The serialized form stored as `Reconciliation.input` — `data` only,
    /// with sorted keys for stable diffs across runs.
    pub fn serialized_input(&self) -> String {
        sorted_keys_json(&self.data)
    }
}

/// Renders `value` as JSON with object keys sorted at every level,
/// mirroring Python's `json.dumps(..., sort_keys=True)`. This is the exact
/// basis for every content hash in this crate (`Resource::hash`,
/// `ResourceKey::legacy_hash`) — changing it changes every stored hash.
pub fn sorted_keys_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k.clone(), sort(v));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort(value)).expect("Value serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provision(key: ResourceKey) -> ExternalResourceProvision {
        ExternalResourceProvision {
            target_secret_name: format!("{}-rds", key.identifier),
            key: key.clone(),
            cluster: "appint-ex-01".to_string(),
            namespace: "external-resources-poc".to_string(),
            provider: "rds".to_string(),
            provisioner_name: key.provisioner_name.clone(),
            identifier: key.identifier.clone(),
            module_provision_data: ModuleProvisionData::terraform_for_key(
                &key,
                "tf-state-bucket",
                "us-east-1",
                "tf-state-lock",
            ),
        }
    }

    #[test]
    fn hash_is_order_independent() {
        let key = ResourceKey::new("aws", "acct-1", "rds", "demo-db");
        let r1 = Resource {
            data: json!({"a": 1, "b": 2}),
            provision: provision(key.clone()),
        };
        let r2 = Resource {
            data: json!({"b": 2, "a": 1}),
            provision: provision(key),
        };
        assert_eq!(r1.hash(), r2.hash());
    }

    #[test]
    fn hash_changes_with_data() {
        let key = ResourceKey::new("aws", "acct-1", "rds", "demo-db");
        let r1 = Resource {
            data: json!({"a": 1}),
            provision: provision(key.clone()),
        };
        let r2 = Resource {
            data: json!({"a": 2}),
            provision: provision(key),
        };
        assert_ne!(r1.hash(), r2.hash());
    }

    #[test]
    fn terraform_state_key_derives_from_state_path() {
        let key = ResourceKey::new("aws", "acct-1", "rds", "demo-db");
        let data =
            ModuleProvisionData::terraform_for_key(&key, "bucket", "us-east-1", "lock-table");
        match data {
            ModuleProvisionData::Terraform { tf_state_key, .. } => {
                assert_eq!(tf_state_key, "aws/acct-1/rds/demo-db/terraform.tfstate");
            }
        }
    }
}
