//! AWS RDS resource factory: parameter group/replica/KMS cross-reference
//! resolution, timeout validation, and the version-upgrade-catalog check.

use crate::error::Error;
use crate::factory::resolver::ResourceValueResolver;
use crate::factory::ResourceFactory;
use crate::inventory::Inventory;
use crate::model::{ModuleConfiguration, Resource, Spec};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};

static TIMEOUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\d+)h)?\s*(?:(\d+)m)?$").expect("static regex is valid"));

const TIMEOUT_KEYS: [&str; 3] = ["create", "update", "delete"];

/// `DescribeValidDBInstanceModifications`-shaped lookup: whether an engine
/// version transition is a catalog-listed valid upgrade target. Consumed
/// through a trait so validation doesn't hard-wire a live AWS API call.
#[async_trait]
pub trait RdsUpgradeCatalog: Send + Sync {
    async fn is_valid_target(
        &self,
        engine: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<bool>;
}

#[derive(Default)]
pub struct AwsRdsFactory {
    pub upgrade_catalog: Option<Arc<dyn RdsUpgradeCatalog>>,
}

impl AwsRdsFactory {
    pub fn with_upgrade_catalog(catalog: Arc<dyn RdsUpgradeCatalog>) -> Self {
        Self {
            upgrade_catalog: Some(catalog),
        }
    }

    fn resolve_inner(
        &self,
        spec: &Spec,
        module_conf: &ModuleConfiguration,
        inventory: &Inventory,
    ) -> Result<Value, Error> {
        let Value::Object(mut map) = spec.resource.clone() else {
            return Err(Error::validation(spec.key(), "rds resource must be a mapping"));
        };

        if let Some(pg) = map.get("parameter_group").cloned() {
            let empty = Value::Object(Map::new());
            let resolved = ResourceValueResolver::new(&pg, &empty, &spec.identifier).resolve();
            map.insert("parameter_group".to_string(), resolved);
        }

        if let Some(replica_source) = map.get("replica_source").and_then(Value::as_str) {
            let source_spec = inventory
                .get_by(
                    "aws",
                    &spec.provisioner.name,
                    "rds",
                    replica_source,
                )
                .ok_or_else(|| {
                    Error::fetch_resource(
                        spec.key(),
                        format!("replica_source '{replica_source}' not found in inventory"),
                    )
                })?;
            let resolved_source = self.resolve_inner(source_spec, module_conf, inventory)?;
            let region = resolved_source
                .get("region")
                .and_then(Value::as_str)
                .map(str::to_string);
            let mut replica = Map::new();
            replica.insert(
                "identifier".to_string(),
                Value::String(source_spec.identifier.clone()),
            );
            if let Some(region) = region {
                replica.insert("region".to_string(), Value::String(region));
            }
            if let Some(bg) = resolved_source.get("blue_green_deployment").cloned() {
                replica.insert("blue_green_deployment".to_string(), bg);
            }
            map.insert("replica_source".to_string(), Value::Object(replica));
        }

        if let Some(kms_key_id) = map.get("kms_key_id").and_then(Value::as_str) {
            if !kms_key_id.starts_with("arn:") {
                let kms_spec = inventory
                    .get_by("aws", &spec.provisioner.name, "kms", kms_key_id)
                    .ok_or_else(|| {
                        Error::fetch_resource(
                            spec.key(),
                            format!("kms key spec '{kms_key_id}' not found in inventory"),
                        )
                    })?;
                map.insert(
                    "kms_key_id".to_string(),
                    Value::String(kms_spec.identifier.clone()),
                );
            }
        }

        if !map.contains_key("region") {
            if let Some(az) = map.get("availability_zone").and_then(Value::as_str) {
                let region = region_from_availability_zone(az).ok_or_else(|| {
                    Error::validation(spec.key(), format!("invalid availability zone '{az}'"))
                })?;
                map.insert("region".to_string(), Value::String(region));
            }
        }

        if !map.contains_key("timeouts") {
            let default_minutes = module_conf.reconcile_timeout_minutes.saturating_sub(5);
            let mut timeouts = Map::new();
            for key in TIMEOUT_KEYS {
                timeouts.insert(key.to_string(), Value::String(format!("{default_minutes}m")));
            }
            map.insert("timeouts".to_string(), Value::Object(timeouts));
        }

        map.insert("output_prefix".to_string(), Value::String(spec.output_prefix()));

        Ok(Value::Object(map))
    }

    fn timeout_minutes(value: &str) -> Result<u32, Error> {
        let caps = TIMEOUT_RE.captures(value).ok_or_else(|| {
            Error::Validation {
                key: crate::model::ResourceKey::new("aws", "", "rds", ""),
                message: format!("invalid timeout value '{value}'"),
            }
        })?;
        let hours: u32 = caps.get(1).map_or(Ok(0), |m| m.as_str().parse())
            .map_err(|_| Error::Validation {
                key: crate::model::ResourceKey::new("aws", "", "rds", ""),
                message: format!("invalid timeout value '{value}'"),
            })?;
        let minutes: u32 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse())
            .map_err(|_| Error::Validation {
                key: crate::model::ResourceKey::new("aws", "", "rds", ""),
                message: format!("invalid timeout value '{value}'"),
            })?;
        Ok(hours * 60 + minutes)
    }

    fn validate_timeouts(
        &self,
        resource: &Resource,
        module_conf: &ModuleConfiguration,
    ) -> Result<(), Error> {
        let key = &resource.provision.key;
        let Some(timeouts) = resource.data.get("timeouts") else {
            return Ok(());
        };
        let Value::Object(map) = timeouts else {
            return Err(Error::validation(key.clone(), "timeouts must be a mapping"));
        };
        for (k, v) in map {
            if !TIMEOUT_KEYS.contains(&k.as_str()) {
                return Err(Error::validation(
                    key.clone(),
                    format!("unknown timeout key '{k}', expected one of {TIMEOUT_KEYS:?}"),
                ));
            }
            let Some(v) = v.as_str() else {
                return Err(Error::validation(key.clone(), format!("timeout '{k}' must be a string")));
            };
            let minutes = Self::timeout_minutes(v).map_err(|_| {
                Error::validation(key.clone(), format!("timeout '{k}'='{v}' does not match h/m format"))
            })?;
            if minutes >= module_conf.reconcile_timeout_minutes {
                return Err(Error::validation(
                    key.clone(),
                    format!(
                        "timeout '{k}'={minutes}m must be strictly less than reconcile_timeout_minutes={}",
                        module_conf.reconcile_timeout_minutes
                    ),
                ));
            }
        }
        Ok(())
    }

    /// The version-upgrade-catalog check (spec.md §4.3): a requested engine
    /// version change must appear in the catalog of valid upgrade targets;
    /// a major-version change additionally requires
    /// `allow_major_version_upgrade=true` on the resource.
    pub async fn validate_engine_version_upgrade(
        &self,
        key: &crate::model::ResourceKey,
        engine: &str,
        current_version: &str,
        requested_version: &str,
        allow_major_version_upgrade: bool,
    ) -> Result<(), Error> {
        if current_version == requested_version {
            return Ok(());
        }
        let Some(catalog) = &self.upgrade_catalog else {
            return Ok(());
        };
        let valid = catalog
            .is_valid_target(engine, current_version, requested_version)
            .await
            .map_err(Error::TransientStore)?;
        if !valid {
            return Err(Error::validation(
                key.clone(),
                format!("'{current_version}' -> '{requested_version}' is not a valid upgrade target for {engine}"),
            ));
        }
        let major_changed = current_version.split('.').next() != requested_version.split('.').next();
        if major_changed && !allow_major_version_upgrade {
            return Err(Error::validation(
                key.clone(),
                "major version upgrades require allow_major_version_upgrade=true",
            ));
        }
        Ok(())
    }

    /// Identifiers of every RDS spec whose `replica_source` is `spec`, used
    /// to surface linked resources (not used to drive scheduling — see
    /// design notes).
    pub fn find_linked(spec: &Spec, inventory: &Inventory) -> std::collections::BTreeSet<crate::model::ResourceKey> {
        inventory
            .items()
            .filter(|(_, s)| {
                s.provision_provider == "aws"
                    && s.provider == "rds"
                    && !s.marked_to_delete()
                    && s.resource
                        .get("replica_source")
                        .and_then(Value::as_str)
                        == Some(spec.identifier.as_str())
            })
            .map(|(k, _)| k.clone())
            .collect()
    }
}

fn region_from_availability_zone(az: &str) -> Option<String> {
    if az.len() < 2 {
        return None;
    }
    let last = az.chars().last()?;
    if !last.is_ascii_lowercase() {
        return None;
    }
    Some(az[..az.len() - 1].to_string())
}

#[async_trait]
impl ResourceFactory for AwsRdsFactory {
    async fn resolve(
        &self,
        spec: &Spec,
        module_conf: &ModuleConfiguration,
        inventory: &Inventory,
    ) -> Result<Value, Error> {
        self.resolve_inner(spec, module_conf, inventory)
    }

    fn validate(&self, resource: &Resource, module_conf: &ModuleConfiguration) -> Result<(), Error> {
        self.validate_timeouts(resource, module_conf)
    }

    fn find_linked_resources(&self, spec: &Spec, inventory: &Inventory) -> std::collections::BTreeSet<crate::model::ResourceKey> {
        Self::find_linked(spec, inventory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Metadata, Namespace, NamespaceRef, Provisioner};
    use serde_json::json;

    fn spec(resource: Value) -> Spec {
        Spec {
            provision_provider: "aws".to_string(),
            provider: "rds".to_string(),
            identifier: "demo-db".to_string(),
            resource,
            provisioner: Provisioner {
                name: "acct-1".to_string(),
                resources_default_region: Some("us-east-1".to_string()),
                supported_deployment_regions: vec![],
                api_credentials: None,
            },
            namespace: NamespaceRef::Inline(Namespace {
                cluster: "appint-ex-01".to_string(),
                name: "team-a".to_string(),
                app: "demo".to_string(),
                environment: "prod".to_string(),
            }),
            metadata: Metadata::default(),
        }
    }

    fn module_conf() -> ModuleConfiguration {
        ModuleConfiguration {
            image: "i".to_string(),
            version: "1".to_string(),
            outputs_secret_image: "o".to_string(),
            outputs_secret_version: "1".to_string(),
            reconcile_drift_interval_minutes: 1440,
            reconcile_timeout_minutes: 1440,
            overridden: false,
        }
    }

    #[test]
    fn resolve_sets_output_prefix() {
        let factory = AwsRdsFactory::default();
        let resolved = factory
            .resolve_inner(&spec(json!({})), &module_conf(), &Inventory::default())
            .unwrap();
        assert_eq!(resolved["output_prefix"], "demo-db-rds");
    }

    #[test]
    fn timeout_regex_accepts_documented_formats() {
        assert_eq!(AwsRdsFactory::timeout_minutes("2h").unwrap(), 120);
        assert_eq!(AwsRdsFactory::timeout_minutes("30m").unwrap(), 30);
        assert_eq!(AwsRdsFactory::timeout_minutes("2h30m").unwrap(), 150);
    }

    #[test]
    fn timeout_regex_rejects_malformed_values() {
        assert!(AwsRdsFactory::timeout_minutes("90").is_err());
        assert!(AwsRdsFactory::timeout_minutes("1h500s").is_err());
    }

    #[test]
    fn region_from_az_strips_trailing_letter() {
        assert_eq!(
            region_from_availability_zone("us-east-1a").as_deref(),
            Some("us-east-1")
        );
        assert_eq!(region_from_availability_zone("x"), None);
    }
}
