//! AWS ElastiCache resource factory: `cluster_mode` hoisting and
//! parameter-group name prefixing.

use crate::error::Error;
use crate::factory::resolver::ResourceValueResolver;
use crate::factory::ResourceFactory;
use crate::inventory::Inventory;
use crate::model::{ModuleConfiguration, Resource, Spec};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub struct AwsElasticacheFactory;

#[async_trait]
impl ResourceFactory for AwsElasticacheFactory {
    async fn resolve(
        &self,
        spec: &Spec,
        _module_conf: &ModuleConfiguration,
        _inventory: &Inventory,
    ) -> Result<Value, Error> {
        let Value::Object(mut map) = spec.resource.clone() else {
            return Err(Error::validation(
                spec.key(),
                "elasticache resource must be a mapping",
            ));
        };

        let replication_group_id = map
            .get("replication_group_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| spec.identifier.clone());
        map.insert(
            "replication_group_id".to_string(),
            Value::String(replication_group_id),
        );

        if let Some(Value::Object(cluster_mode)) = map.remove("cluster_mode") {
            for (k, v) in cluster_mode {
                map.insert(k, v);
            }
        }

        if let Some(pg) = map.get("parameter_group").cloned() {
            let empty = Value::Object(Map::new());
            let resolved = ResourceValueResolver::new(&pg, &empty, &spec.identifier).resolve();
            map.insert("parameter_group".to_string(), resolved);
        }

        map.insert("output_prefix".to_string(), Value::String(spec.output_prefix()));

        Ok(Value::Object(map))
    }

    fn validate(&self, resource: &Resource, _module_conf: &ModuleConfiguration) -> Result<(), Error> {
        let key = &resource.provision.key;
        let replication_group_id = resource
            .data
            .get("replication_group_id")
            .and_then(Value::as_str)
            .unwrap_or(&resource.provision.identifier)
            .to_string();

        let declared_name = resource.data.pointer("/parameter_group/name").and_then(Value::as_str);
        let expected_name = match declared_name {
            None => format!("{replication_group_id}-pg"),
            Some(name) => format!("{replication_group_id}-{name}"),
        };

        match resource.data.get("parameter_group_name").and_then(Value::as_str) {
            None => Ok(()),
            Some(explicit) if explicit == expected_name => Ok(()),
            Some(explicit) => Err(Error::validation(
                key.clone(),
                format!(
                    "parameter_group_name '{explicit}' does not match derived parameter_group.name '{expected_name}'"
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExternalResourceProvision, ModuleProvisionData, ResourceKey};
    use crate::model::{Metadata, Namespace, NamespaceRef, Provisioner};
    use serde_json::json;

    fn spec() -> Spec {
        Spec {
            provision_provider: "aws".to_string(),
            provider: "elasticache".to_string(),
            identifier: "demo-cache".to_string(),
            resource: json!({}),
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

    fn resource(data: Value) -> Resource {
        let key = ResourceKey::new("aws", "acct-1", "elasticache", "demo-cache");
        Resource {
            data,
            provision: ExternalResourceProvision {
                key: key.clone(),
                cluster: "appint-ex-01".to_string(),
                namespace: "team-a".to_string(),
                provider: "elasticache".to_string(),
                provisioner_name: "acct-1".to_string(),
                identifier: "demo-cache".to_string(),
                target_secret_name: "demo-cache-elasticache".to_string(),
                module_provision_data: ModuleProvisionData::terraform_for_key(
                    &key,
                    "bucket",
                    "us-east-1",
                    "lock",
                ),
            },
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
    fn mismatched_explicit_parameter_group_name_fails() {
        let factory = AwsElasticacheFactory;
        let data = json!({
            "replication_group_id": "demo-cache",
            "parameter_group": {"name": "custom"},
            "parameter_group_name": "totally-different",
        });
        let err = factory.validate(&resource(data), &module_conf()).unwrap_err();
        assert!(err.is_validation_class());
    }

    #[test]
    fn matching_explicit_parameter_group_name_passes() {
        let factory = AwsElasticacheFactory;
        let data = json!({
            "replication_group_id": "demo-cache",
            "parameter_group": {"name": "custom"},
            "parameter_group_name": "demo-cache-custom",
        });
        factory.validate(&resource(data), &module_conf()).unwrap();
    }

    #[test]
    fn no_explicit_parameter_group_name_skips_check() {
        let factory = AwsElasticacheFactory;
        let data = json!({
            "replication_group_id": "demo-cache",
            "parameter_group": {"name": "anything-at-all"},
        });
        factory.validate(&resource(data), &module_conf()).unwrap();
    }

    #[test]
    fn absent_parameter_group_derives_default_pg_name() {
        let factory = AwsElasticacheFactory;
        let data = json!({
            "replication_group_id": "demo-cache",
            "parameter_group_name": "demo-cache-pg",
        });
        factory.validate(&resource(data), &module_conf()).unwrap();
    }

    #[tokio::test]
    async fn resolve_sets_output_prefix() {
        let factory = AwsElasticacheFactory;
        let resolved = factory
            .resolve(&spec(), &module_conf(), &Inventory::default())
            .await
            .unwrap();
        assert_eq!(resolved["output_prefix"], "demo-cache-elasticache");
    }
}
