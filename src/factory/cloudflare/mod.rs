//! Cloudflare resource factories: account-id resolution common to every
//! Cloudflare resource type, plus the zone-specific ruleset JSON
//! decoding.

use crate::error::Error;
use crate::factory::resolver::ResourceValueResolver;
use crate::factory::{build_provision, ExternalResourceFactory, ObjectFactory, ResourceFactory};
use crate::inventory::Inventory;
use crate::model::{ModuleConfiguration, ModuleProvisionData, Resource, Spec};
use crate::secret_reader::SecretReader;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Reads the provisioner's `api_credentials` secret via `secret_reader` and
/// extracts `account_id`, failing with `SecretIncomplete` if it's missing —
/// mirrors `get_account_id` in the original Cloudflare factory module.
pub async fn account_id_from_credentials(
    spec: &Spec,
    secret_reader: &dyn SecretReader,
    credentials: &Value,
) -> Result<String, Error> {
    let fields = secret_reader.read_all(credentials).await.map_err(|e| {
        Error::secret_incomplete(spec.key(), format!("reading provisioner api_credentials: {e}"))
    })?;
    fields.get("account_id").cloned().ok_or_else(|| {
        Error::secret_incomplete(
            spec.key(),
            "provisioner api_credentials secret is missing 'account_id'",
        )
    })
}

pub struct CloudflareExternalResourceFactory {
    pub resource_factories: ObjectFactory<dyn ResourceFactory>,
    pub backend: crate::factory::aws::TerraformBackend,
    /// Cluster the reconciler's Jobs dispatch into (`settings.workers_cluster`),
    /// recorded on every resource's provision envelope.
    pub workers_cluster: String,
}

impl CloudflareExternalResourceFactory {
    pub fn new(
        backend: crate::factory::aws::TerraformBackend,
        workers_cluster: impl Into<String>,
        secret_reader: Arc<dyn SecretReader>,
    ) -> Self {
        let mut resource_factories: ObjectFactory<dyn ResourceFactory> = ObjectFactory::new();
        resource_factories.register(
            "default",
            Arc::new(CloudflareDefaultResourceFactory { secret_reader: secret_reader.clone() }),
        );
        resource_factories.register("zone", Arc::new(CloudflareZoneFactory { secret_reader }));
        Self {
            resource_factories,
            backend,
            workers_cluster: workers_cluster.into(),
        }
    }
}

#[async_trait]
impl ExternalResourceFactory for CloudflareExternalResourceFactory {
    async fn create_external_resource(
        &self,
        spec: &Spec,
        module_conf: &ModuleConfiguration,
        inventory: &Inventory,
    ) -> Result<Resource, Error> {
        let delegate = self.resource_factories.get(&spec.provider);
        let data = delegate.resolve(spec, module_conf, inventory).await?;

        let provision_data = ModuleProvisionData::terraform_for_key(
            &spec.key(),
            &self.backend.bucket,
            &self.backend.region,
            &self.backend.dynamodb_table,
        );
        let provision = build_provision(spec, &self.workers_cluster, provision_data);
        Ok(Resource { data, provision })
    }

    fn validate_external_resource(
        &self,
        resource: &Resource,
        module_conf: &ModuleConfiguration,
    ) -> Result<(), Error> {
        let delegate = self.resource_factories.get(&resource.provision.provider);
        delegate.validate(resource, module_conf)
    }
}

pub struct CloudflareDefaultResourceFactory {
    secret_reader: Arc<dyn SecretReader>,
}

#[async_trait]
impl ResourceFactory for CloudflareDefaultResourceFactory {
    async fn resolve(
        &self,
        spec: &Spec,
        _module_conf: &ModuleConfiguration,
        _inventory: &Inventory,
    ) -> Result<Value, Error> {
        let empty = Value::Object(Map::new());
        let mut resolved = ResourceValueResolver::new(&spec.resource, &empty, &spec.identifier)
            .identifier_as_value(true)
            .resolve();
        if let Some(credentials) = &spec.provisioner.api_credentials {
            let account_id =
                account_id_from_credentials(spec, self.secret_reader.as_ref(), credentials).await?;
            if let Value::Object(map) = &mut resolved {
                map.insert("account_id".to_string(), Value::String(account_id));
            }
        }
        Ok(resolved)
    }

    fn validate(&self, _resource: &Resource, _module_conf: &ModuleConfiguration) -> Result<(), Error> {
        Ok(())
    }
}

pub struct CloudflareZoneFactory {
    secret_reader: Arc<dyn SecretReader>,
}

#[async_trait]
impl ResourceFactory for CloudflareZoneFactory {
    async fn resolve(
        &self,
        spec: &Spec,
        module_conf: &ModuleConfiguration,
        inventory: &Inventory,
    ) -> Result<Value, Error> {
        let mut resolved = CloudflareDefaultResourceFactory { secret_reader: self.secret_reader.clone() }
            .resolve(spec, module_conf, inventory)
            .await?;

        if let Value::Object(map) = &mut resolved {
            if let Some(Value::Array(rulesets)) = map.get_mut("rulesets") {
                for ruleset in rulesets {
                    let Value::Object(ruleset) = ruleset else { continue };
                    let Some(Value::Array(rules)) = ruleset.get_mut("rules") else { continue };
                    for rule in rules {
                        let Value::Object(rule) = rule else { continue };
                        let Some(params) = rule.get_mut("action_parameters") else { continue };
                        if let Value::String(raw) = params {
                            if let Ok(decoded) = serde_json::from_str::<Value>(raw) {
                                *params = decoded;
                            }
                        }
                    }
                }
            }
        }

        Ok(resolved)
    }

    fn validate(&self, _resource: &Resource, _module_conf: &ModuleConfiguration) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Metadata, Namespace, NamespaceRef, Provisioner};
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeSecretReader;

    #[async_trait]
    impl SecretReader for FakeSecretReader {
        async fn read_all(&self, secret_ref: &Value) -> anyhow::Result<HashMap<String, String>> {
            let mut fields = HashMap::new();
            if secret_ref.get("path").and_then(Value::as_str) == Some("cloudflare/creds") {
                fields.insert("account_id".to_string(), "abc123".to_string());
            }
            Ok(fields)
        }
    }

    fn spec_with_credentials() -> Spec {
        Spec {
            provision_provider: "cloudflare".to_string(),
            provider: "zone".to_string(),
            identifier: "example-com".to_string(),
            resource: json!({
                "rulesets": [{"rules": [{"action_parameters": "{\"uri\":\"/foo\"}"}]}]
            }),
            provisioner: Provisioner {
                name: "acct-1".to_string(),
                resources_default_region: None,
                supported_deployment_regions: vec![],
                api_credentials: Some(json!({"path": "cloudflare/creds"})),
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

    #[tokio::test]
    async fn zone_factory_decodes_embedded_json_action_parameters() {
        let factory = CloudflareZoneFactory { secret_reader: Arc::new(FakeSecretReader) };
        let inventory = Inventory::default();
        let resolved = factory
            .resolve(&spec_with_credentials(), &module_conf(), &inventory)
            .await
            .unwrap();
        assert_eq!(
            resolved["rulesets"][0]["rules"][0]["action_parameters"]["uri"],
            "/foo"
        );
        assert_eq!(resolved["account_id"], "abc123");
    }

    #[tokio::test]
    async fn missing_account_id_is_secret_incomplete() {
        let mut spec = spec_with_credentials();
        spec.provisioner.api_credentials = Some(json!({"path": "cloudflare/other"}));
        let factory = CloudflareDefaultResourceFactory { secret_reader: Arc::new(FakeSecretReader) };
        let inventory = Inventory::default();
        let err = factory
            .resolve(&spec, &module_conf(), &inventory)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SecretIncomplete { .. }));
    }
}
