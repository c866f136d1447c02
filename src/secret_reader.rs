//! The secret-store contract this crate consumes (spec.md §4.3, §4.4
//! suspension points): resolves a free-form secret reference — the AWS MSK
//! factory's SCRAM users and the Cloudflare factories' `api_credentials`
//! both go through this seam rather than assuming pre-fetched data.

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde_json::Value;
use std::collections::HashMap;

#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Reads every field of the secret referenced by `secret_ref` (a
    /// free-form JSON pointer into the secret store's own addressing
    /// scheme — path/version/field, interpreted entirely by the
    /// implementation).
    async fn read_all(&self, secret_ref: &serde_json::Value) -> Result<HashMap<String, String>>;

    /// Reads a single field of the secret referenced by `secret_ref`.
    async fn read_field(&self, secret_ref: &serde_json::Value, field: &str) -> Result<String> {
        let all = self.read_all(secret_ref).await?;
        all.get(field)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("secret is missing field '{field}'"))
    }
}

/// Reads secrets out of Kubernetes `Secret` objects, addressed by
/// `{"path": "<namespace>/<name>"}` — the same namespace/name addressing
/// the synchroniser uses for the module's output Secret.
pub struct KubeSecretReader {
    client: Client,
}

impl KubeSecretReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretReader for KubeSecretReader {
    async fn read_all(&self, secret_ref: &Value) -> Result<HashMap<String, String>> {
        let path = secret_ref
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("secret reference is missing 'path'"))?;
        let (namespace, name) = path
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("secret path '{path}' must be '<namespace>/<name>'"))?;

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get(name)
            .await
            .with_context(|| format!("reading secret '{path}'"))?;

        let mut fields = HashMap::new();
        if let Some(data) = &secret.data {
            for (k, v) in data {
                let value = String::from_utf8(v.0.clone())
                    .with_context(|| format!("secret field '{k}' in '{path}' is not valid UTF-8"))?;
                fields.insert(k.clone(), value);
            }
        }
        Ok(fields)
    }
}
