//! `ResourceKey` — the globally unique, deterministic identity of an
//! externally managed resource.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a single externally managed resource: which provisioning
/// backend drives it (`provision_provider`), which provisioner account
/// declares it (`provisioner_name`), which cloud API shape it resolves to
/// (`provider`), and its unique name within that scope (`identifier`).
///
/// This is the single unification of what the original implementation
/// modeled as two near-duplicate types (`ExternalResourceKey` in its
/// manager module and `ExternalResourceUniqueKey` in its catalog-spec
/// utility module).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub provision_provider: String,
    pub provisioner_name: String,
    pub provider: String,
    pub identifier: String,
}

impl ResourceKey {
    pub fn new(
        provision_provider: impl Into<String>,
        provisioner_name: impl Into<String>,
        provider: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            provision_provider: provision_provider.into(),
            provisioner_name: provisioner_name.into(),
            provider: provider.into(),
            identifier: identifier.into(),
        }
    }

    /// Textual partition-key form: `"<pp>/<pn>/<p>/<id>"`. This is the
    /// canonical state-store key and the form used in log lines.
    pub fn state_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.provision_provider, self.provisioner_name, self.provider, self.identifier
        )
    }

    /// Legacy content hash (md5 over the JSON-sorted-keys serialization of
    /// the four identity fields). Some state records written before the
    /// textual-path migration use this as their partition key; the state
    /// store's deserializer must accept either form.
    pub fn legacy_hash(&self) -> String {
        let value = serde_json::json!({
            "provision_provider": self.provision_provider,
            "provisioner_name": self.provisioner_name,
            "provider": self.provider,
            "identifier": self.identifier,
        });
        let sorted = crate::model::resource::sorted_keys_json(&value);
        format!("{:x}", md5::compute(sorted.as_bytes()))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_path_format() {
        let key = ResourceKey::new("aws", "acct-1", "rds", "demo-db");
        assert_eq!(key.state_path(), "aws/acct-1/rds/demo-db");
        assert_eq!(key.to_string(), "aws/acct-1/rds/demo-db");
    }

    #[test]
    fn legacy_hash_is_deterministic() {
        let key = ResourceKey::new("aws", "acct-1", "rds", "demo-db");
        let h1 = key.legacy_hash();
        let h2 = key.legacy_hash();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);
    }

    #[test]
    fn key_is_injective_over_distinct_identifiers() {
        let a = ResourceKey::new("aws", "acct-1", "rds", "a");
        let b = ResourceKey::new("aws", "acct-1", "rds", "b");
        assert_ne!(a, b);
        assert_ne!(a.state_path(), b.state_path());
    }
}
