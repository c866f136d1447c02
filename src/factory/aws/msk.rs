//! AWS MSK resource factory: SCRAM user secret resolution and broker/subnet
//! count validation.

use crate::error::Error;
use crate::factory::ResourceFactory;
use crate::inventory::Inventory;
use crate::model::{ModuleConfiguration, Resource, Spec};
use crate::secret_reader::SecretReader;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct AwsMskFactory {
    secret_reader: Arc<dyn SecretReader>,
}

impl AwsMskFactory {
    pub fn new(secret_reader: Arc<dyn SecretReader>) -> Self {
        Self { secret_reader }
    }
}

#[async_trait]
impl ResourceFactory for AwsMskFactory {
    async fn resolve(
        &self,
        spec: &Spec,
        _module_conf: &ModuleConfiguration,
        _inventory: &Inventory,
    ) -> Result<Value, Error> {
        let Value::Object(mut map) = spec.resource.clone() else {
            return Err(Error::validation(spec.key(), "msk resource must be a mapping"));
        };

        let scram_enabled = map
            .pointer("/client_authentication/sasl/scram")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut scram_users = Map::new();
        if scram_enabled {
            let users = match map.remove("users") {
                Some(Value::Array(users)) if !users.is_empty() => users,
                _ => {
                    return Err(Error::validation(
                        spec.key(),
                        "users attribute must be given when client_authentication.sasl.scram is enabled",
                    ))
                }
            };
            for user in &users {
                let name = user.get("name").and_then(Value::as_str).ok_or_else(|| {
                    Error::validation(spec.key(), "msk scram user missing 'name'")
                })?;
                let secret_ref = user.get("secret").ok_or_else(|| {
                    Error::validation(spec.key(), format!("msk scram user '{name}' missing 'secret'"))
                })?;
                let fields = self.secret_reader.read_all(secret_ref).await.map_err(|e| {
                    Error::secret_incomplete(spec.key(), format!("reading secret for msk user '{name}': {e}"))
                })?;
                let secret_data: Map<String, Value> = fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect();
                scram_users.insert(name.to_string(), Value::Object(secret_data));
            }
        }
        map.insert("scram_users".to_string(), Value::Object(scram_users));
        map.insert("output_prefix".to_string(), Value::String(spec.output_prefix()));

        Ok(Value::Object(map))
    }

    fn validate(&self, resource: &Resource, _module_conf: &ModuleConfiguration) -> Result<(), Error> {
        let key = &resource.provision.key;
        let broker_nodes = resource
            .data
            .get("number_of_broker_nodes")
            .and_then(Value::as_u64);
        let client_subnets = resource
            .data
            .pointer("/broker_node_group_info/client_subnets")
            .and_then(Value::as_array);

        if let (Some(broker_nodes), Some(client_subnets)) = (broker_nodes, client_subnets) {
            let subnet_count = client_subnets.len() as u64;
            if subnet_count == 0 || broker_nodes % subnet_count != 0 {
                return Err(Error::validation(
                    key.clone(),
                    format!(
                        "number_of_broker_nodes ({broker_nodes}) must be a multiple of client_subnets ({subnet_count})"
                    ),
                ));
            }
        }

        if let Some(Value::Object(scram_users)) = resource.data.get("scram_users") {
            for (username, secret) in scram_users {
                let Value::Object(fields) = secret else {
                    return Err(Error::secret_incomplete(
                        key.clone(),
                        format!("scram user '{username}' secret is not a mapping"),
                    ));
                };
                let mut keys: Vec<&str> = fields.keys().map(String::as_str).collect();
                keys.sort_unstable();
                if keys != ["password", "username"] {
                    return Err(Error::secret_incomplete(
                        key.clone(),
                        format!("scram user '{username}' secret must contain exactly {{username, password}}"),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKey;
    use crate::model::{ExternalResourceProvision, ModuleProvisionData};
    use crate::model::{Metadata, Namespace, NamespaceRef, Provisioner};
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeSecretReader;

    #[async_trait]
    impl SecretReader for FakeSecretReader {
        async fn read_all(&self, secret_ref: &Value) -> anyhow::Result<HashMap<String, String>> {
            let path = secret_ref.get("path").and_then(Value::as_str).unwrap_or_default();
            let mut fields = HashMap::new();
            fields.insert("username".to_string(), "alice".to_string());
            fields.insert("password".to_string(), format!("pw-for-{path}"));
            Ok(fields)
        }
    }

    fn factory() -> AwsMskFactory {
        AwsMskFactory::new(Arc::new(FakeSecretReader))
    }

    fn spec(resource: Value) -> Spec {
        Spec {
            provision_provider: "aws".to_string(),
            provider: "msk".to_string(),
            identifier: "demo-msk".to_string(),
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

    fn resource(data: Value) -> Resource {
        let key = ResourceKey::new("aws", "acct-1", "msk", "demo-msk");
        Resource {
            data,
            provision: ExternalResourceProvision {
                key: key.clone(),
                cluster: "appint-ex-01".to_string(),
                namespace: "team-a".to_string(),
                provider: "msk".to_string(),
                provisioner_name: "acct-1".to_string(),
                identifier: "demo-msk".to_string(),
                target_secret_name: "demo-msk-msk".to_string(),
                module_provision_data: ModuleProvisionData::terraform_for_key(
                    &key,
                    "bucket",
                    "us-east-1",
                    "lock",
                ),
            },
        }
    }

    #[test]
    fn broker_node_count_must_divide_evenly() {
        let data = json!({
            "number_of_broker_nodes": 5,
            "broker_node_group_info": {"client_subnets": ["a", "b"]},
        });
        let err = factory().validate(&resource(data), &module_conf()).unwrap_err();
        assert!(err.is_validation_class());
    }

    #[test]
    fn scram_user_secret_must_have_exact_fields() {
        let data = json!({
            "scram_users": {"alice": {"username": "alice", "password": "x", "extra": "y"}}
        });
        let err = factory().validate(&resource(data), &module_conf()).unwrap_err();
        assert!(matches!(err, Error::SecretIncomplete { .. }));
    }

    #[tokio::test]
    async fn resolve_reads_scram_users_through_the_secret_reader() {
        let s = spec(json!({
            "client_authentication": {"sasl": {"scram": true}},
            "users": [{"name": "alice", "secret": {"path": "team-a/alice-creds"}}],
        }));
        let resolved = factory().resolve(&s, &module_conf(), &Inventory::default()).await.unwrap();
        assert_eq!(resolved["scram_users"]["alice"]["username"], "alice");
        assert_eq!(resolved["scram_users"]["alice"]["password"], "pw-for-team-a/alice-creds");
        assert!(resolved.get("users").is_none());
    }

    #[tokio::test]
    async fn scram_enabled_without_users_is_rejected() {
        let s = spec(json!({"client_authentication": {"sasl": {"scram": true}}}));
        let err = factory().resolve(&s, &module_conf(), &Inventory::default()).await.unwrap_err();
        assert!(err.is_validation_class());
    }

    #[tokio::test]
    async fn scram_disabled_sets_empty_scram_users_map() {
        let s = spec(json!({}));
        let resolved = factory().resolve(&s, &module_conf(), &Inventory::default()).await.unwrap();
        assert_eq!(resolved["scram_users"], json!({}));
    }

    #[tokio::test]
    async fn resolve_sets_output_prefix() {
        let s = spec(json!({}));
        let resolved = factory().resolve(&s, &module_conf(), &Inventory::default()).await.unwrap();
        assert_eq!(resolved["output_prefix"], "demo-msk-msk");
    }
}
