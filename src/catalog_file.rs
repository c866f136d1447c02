//! A file-backed [`CatalogClient`](crate::catalog::CatalogClient).
//!
//! The real catalog query layer (a GraphQL client against typed, generated
//! query code) is an external collaborator this crate only ever consumes
//! through the `CatalogClient` trait — see `catalog.rs`. This module is the
//! one concrete implementation this crate ships: it reads the same shape of
//! data (namespaces, modules, settings) from a single JSON or YAML document
//! on disk, which is what `main.rs` and `ermctl` construct by default unless
//! a deployment wires in its own `CatalogClient` in front of a live catalog.

use crate::catalog::{CatalogClient, CatalogNamespace, CatalogSettings, ExternalResourceBlock};
use crate::model::{Module, Namespace};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawBlock {
    provision_provider: String,
    #[serde(default)]
    resources: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawNamespace {
    #[serde(flatten)]
    namespace: Namespace,
    #[serde(default)]
    external_resources: Vec<RawBlock>,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    state_table_name: String,
    state_account_name: String,
    workers_cluster: String,
    workers_namespace: String,
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    namespaces: Vec<RawNamespace>,
    #[serde(default)]
    modules: Vec<Module>,
    settings: RawSettings,
}

/// Reads namespaces/modules/settings from a single document, parsed as YAML
/// (a superset of JSON, so `.json` catalog snapshots load the same way).
/// Loaded once at startup; `get_*` calls clone the in-memory copy.
#[derive(Debug, Clone)]
pub struct JsonFileCatalogClient {
    namespaces: Vec<CatalogNamespace>,
    modules: Vec<Module>,
    settings: CatalogSettings,
}

impl JsonFileCatalogClient {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog document at {}", path.display()))?;
        let doc: CatalogDocument = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing catalog document at {}", path.display()))?;

        let namespaces = doc
            .namespaces
            .into_iter()
            .map(|ns| CatalogNamespace {
                namespace: ns.namespace,
                external_resources: ns
                    .external_resources
                    .into_iter()
                    .map(|b| ExternalResourceBlock {
                        provision_provider: b.provision_provider,
                        resources: b.resources,
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            namespaces,
            modules: doc.modules,
            settings: CatalogSettings {
                state_table_name: doc.settings.state_table_name,
                state_account_name: doc.settings.state_account_name,
                workers_cluster: doc.settings.workers_cluster,
                workers_namespace: doc.settings.workers_namespace,
            },
        })
    }
}

#[async_trait]
impl CatalogClient for JsonFileCatalogClient {
    async fn get_namespaces(&self) -> Result<Vec<CatalogNamespace>> {
        Ok(self.namespaces.clone())
    }

    async fn get_modules(&self) -> Result<Vec<Module>> {
        Ok(self.modules.clone())
    }

    async fn get_settings(&self) -> Result<CatalogSettings> {
        Ok(self.settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A uniquely named file under the OS temp dir, removed on drop. Avoids
    /// pulling in a scratch-file crate for this one test fixture.
    struct TempDoc(std::path::PathBuf);

    impl TempDoc {
        fn new(contents: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "erm-catalog-test-{}-{:?}.yaml",
                std::process::id(),
                std::thread::current().id()
            ));
            std::fs::write(&path, contents).unwrap();
            Self(path)
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDoc {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[tokio::test]
    async fn loads_namespaces_modules_and_settings() {
        let doc = TempDoc::new(
            r#"
settings:
  state_table_name: erm-state
  state_account_name: app-sre
  workers_cluster: appint-ex-01
  workers_namespace: external-resources-poc
modules:
  - provision_provider: aws
    provider: rds
    image: quay.io/app-sre/erm-tf
    version: "1.0"
    outputs_secret_image: quay.io/app-sre/erm-outputs
    outputs_secret_version: "1.0"
    reconcile_drift_interval_minutes: 1440
    reconcile_timeout_minutes: 1440
    resources:
      cpu_request: "100m"
      memory_request: "256Mi"
      cpu_limit: "200m"
      memory_limit: "512Mi"
namespaces:
  - cluster: appint-ex-01
    name: demo-ns
    app: demo
    environment: stage
    external_resources:
      - provision_provider: aws
        resources:
          - provider: rds
            identifier: demo-db
            provisioner:
              name: acct-1
            resource:
              managed_by_erv2: true
"#,
        );

        let client = JsonFileCatalogClient::from_path(doc.path()).unwrap();
        let namespaces = client.get_namespaces().await.unwrap();
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces[0].external_resources.len(), 1);

        let modules = client.get_modules().await.unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].provider, "rds");

        let settings = client.get_settings().await.unwrap();
        assert_eq!(settings.state_table_name, "erm-state");
    }

    #[test]
    fn missing_file_is_a_clear_error() {
        let err = JsonFileCatalogClient::from_path("/nonexistent/catalog.yaml").unwrap_err();
        assert!(err.to_string().contains("reading catalog document"));
    }
}
