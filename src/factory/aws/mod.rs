//! AWS resource factories (spec.md §4.3): the orchestrating
//! `AwsExternalResourceFactory` plus per-resource-type sub-factories.

pub mod elasticache;
pub mod msk;
pub mod rds;

use crate::constants::{aws_default_tags, INTEGRATION_NAME};
use crate::error::Error;
use crate::factory::resolver::ResourceValueResolver;
use crate::factory::{build_provision, ExternalResourceFactory, ObjectFactory, ResourceFactory};
use crate::inventory::Inventory;
use crate::model::{ModuleConfiguration, ModuleProvisionData, Resource, Spec};
use crate::secret_reader::SecretReader;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// State-store-adjacent bucket/region/table used to derive Terraform
/// provision data for every AWS resource.
#[derive(Debug, Clone)]
pub struct TerraformBackend {
    pub bucket: String,
    pub region: String,
    pub dynamodb_table: String,
}

/// The provider-agnostic-within-AWS orchestration described in spec.md
/// §4.3: pre-processing (value resolution default, tagging, region
/// selection, provision-data construction) around a delegate
/// `ResourceFactory`.
pub struct AwsExternalResourceFactory {
    pub resource_factories: ObjectFactory<dyn ResourceFactory>,
    pub backend: TerraformBackend,
    /// Cluster the reconciler's Jobs dispatch into (`settings.workers_cluster`),
    /// recorded on every resource's provision envelope.
    pub workers_cluster: String,
}

impl AwsExternalResourceFactory {
    pub fn new(
        backend: TerraformBackend,
        workers_cluster: impl Into<String>,
        secret_reader: Arc<dyn SecretReader>,
    ) -> Self {
        let mut resource_factories: ObjectFactory<dyn ResourceFactory> = ObjectFactory::new();
        resource_factories.register("default", Arc::new(AwsDefaultResourceFactory));
        resource_factories.register("rds", Arc::new(rds::AwsRdsFactory::default()));
        resource_factories.register("msk", Arc::new(msk::AwsMskFactory::new(secret_reader)));
        resource_factories.register(
            "elasticache",
            Arc::new(elasticache::AwsElasticacheFactory),
        );
        Self {
            resource_factories,
            backend,
            workers_cluster: workers_cluster.into(),
        }
    }

    fn select_region(&self, spec: &Spec, declared_region: Option<&str>) -> Result<String, Error> {
        if let Some(region) = declared_region {
            if !spec.provisioner.supported_deployment_regions.is_empty()
                && !spec
                    .provisioner
                    .supported_deployment_regions
                    .iter()
                    .any(|r| r == region)
            {
                return Err(Error::validation(
                    spec.key(),
                    format!("region '{region}' is not in the provisioner's supported regions"),
                ));
            }
            return Ok(region.to_string());
        }
        spec.provisioner
            .resources_default_region
            .clone()
            .ok_or_else(|| Error::validation(spec.key(), "no region declared and provisioner has no default region"))
    }
}

#[async_trait]
impl ExternalResourceFactory for AwsExternalResourceFactory {
    async fn create_external_resource(
        &self,
        spec: &Spec,
        module_conf: &ModuleConfiguration,
        inventory: &Inventory,
    ) -> Result<Resource, Error> {
        let delegate = self.resource_factories.get(&spec.provider);
        let mut data = delegate.resolve(spec, module_conf, inventory).await?;

        if let Value::Object(map) = &mut data {
            map.insert("tags".to_string(), spec.tags(INTEGRATION_NAME));
            map.insert("default_tags".to_string(), aws_default_tags());

            let declared_region = map.get("region").and_then(Value::as_str).map(str::to_string);
            let region = self.select_region(spec, declared_region.as_deref())?;
            map.insert("region".to_string(), Value::String(region));
        }

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

    fn find_linked_resources(&self, spec: &Spec, inventory: &Inventory) -> std::collections::BTreeSet<crate::model::ResourceKey> {
        self.resource_factories.get(&spec.provider).find_linked_resources(spec, inventory)
    }
}

/// The fallback resource factory: resolves via `ResourceValueResolver`
/// with `identifier_as_value=true`, performs no provider-specific
/// validation.
pub struct AwsDefaultResourceFactory;

#[async_trait]
impl ResourceFactory for AwsDefaultResourceFactory {
    async fn resolve(
        &self,
        spec: &Spec,
        _module_conf: &ModuleConfiguration,
        _inventory: &Inventory,
    ) -> Result<Value, Error> {
        let empty = Value::Object(Default::default());
        Ok(
            ResourceValueResolver::new(&spec.resource, &empty, &spec.identifier)
                .identifier_as_value(true)
                .resolve(),
        )
    }

    fn validate(&self, _resource: &Resource, _module_conf: &ModuleConfiguration) -> Result<(), Error> {
        Ok(())
    }
}
