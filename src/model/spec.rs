//! `Spec` — a single catalog-declared external resource, prior to factory
//! resolution, plus the namespace-selector expansion that turns one
//! selector-bearing spec into N concrete specs.

use crate::model::key::ResourceKey;
use anyhow::{Context, Result};
use jsonpath_rust::JsonPathQuery;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The cluster/namespace/app/environment a resource's tags and output
/// secret are scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub cluster: String,
    pub name: String,
    pub app: String,
    pub environment: String,
}

/// A namespace selector: a spec inlined under a selector instead of a
/// concrete namespace expands, at inventory-build time, into one spec per
/// namespace whose JSON representation matches `include` and none of
/// `exclude`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSelector {
    /// JSONPath expressions; a namespace matches if at least one yields a
    /// non-empty result against its JSON representation.
    pub include: Vec<String>,
    /// JSONPath expressions; a namespace is excluded if any yields a
    /// non-empty result, taking precedence over `include` on overlap.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NamespaceRef {
    Inline(Namespace),
    Selector(NamespaceSelector),
}

/// Provisioner metadata: credential references and default regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioner {
    pub name: String,
    #[serde(default)]
    pub resources_default_region: Option<String>,
    #[serde(default)]
    pub supported_deployment_regions: Vec<String>,
    /// Free-form credential reference (secret path/keys), interpreted by
    /// the `SecretReader` the manager is constructed with.
    #[serde(default)]
    pub api_credentials: Option<Value>,
}

/// Spec-level management metadata; never leaks into the resolved `Resource`
/// or its hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub module_overrides: Option<Value>,
}

/// A single catalog-declared external resource, as read from the
/// inventory before factory resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    pub provision_provider: String,
    pub provider: String,
    pub identifier: String,
    pub resource: Value,
    pub provisioner: Provisioner,
    pub namespace: NamespaceRef,
    #[serde(default)]
    pub metadata: Metadata,
}

/// The shape a single resource takes inside a catalog namespace's
/// `external_resources` block, before the enclosing namespace or a
/// selector has been attached. `provision_provider` and the namespace
/// itself come from the enclosing block, not from this struct.
#[derive(Debug, Clone, Deserialize)]
pub struct RawResource {
    pub provider: String,
    pub identifier: String,
    pub resource: Value,
    pub provisioner: Provisioner,
    #[serde(default)]
    pub namespace_selector: Option<NamespaceSelector>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RawResource {
    /// Attaches the provision provider and either the enclosing namespace
    /// or this resource's own selector.
    pub fn into_spec(self, provision_provider: &str, enclosing_namespace: &Namespace) -> Spec {
        let namespace = match self.namespace_selector {
            Some(selector) => NamespaceRef::Selector(selector),
            None => NamespaceRef::Inline(enclosing_namespace.clone()),
        };
        Spec {
            provision_provider: provision_provider.to_string(),
            provider: self.provider,
            identifier: self.identifier,
            resource: self.resource,
            provisioner: self.provisioner,
            namespace,
            metadata: self.metadata,
        }
    }
}

impl Spec {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            &self.provision_provider,
            &self.provisioner.name,
            &self.provider,
            &self.identifier,
        )
    }

    pub fn marked_to_delete(&self) -> bool {
        self.metadata.delete
    }

    pub fn managed_by_erv2(&self) -> bool {
        self.resource
            .get("managed_by_erv2")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// `namespace()` after expansion — only meaningful once a spec carries
    /// an inline namespace (post-selector-expansion invariant).
    pub fn namespace(&self) -> Option<&Namespace> {
        match &self.namespace {
            NamespaceRef::Inline(ns) => Some(ns),
            NamespaceRef::Selector(_) => None,
        }
    }

    /// `"<identifier>-<provider>"`, provider underscores normalized to
    /// hyphens for DNS-1123 compliance.
    pub fn output_prefix(&self) -> String {
        format!("{}-{}", self.identifier, self.provider.replace('_', "-"))
    }

    /// Destination secret name: an explicit `output_resource_name` on the
    /// resource mapping, or `output_prefix()`.
    pub fn output_resource_name(&self) -> String {
        self.resource
            .get("output_resource_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.output_prefix())
    }

    /// Integration-owned tags applied to every AWS resource this spec
    /// resolves to.
    pub fn tags(&self, integration: &str) -> Value {
        let ns = self.namespace();
        serde_json::json!({
            "managed_by_integration": integration,
            "cluster": ns.map(|n| n.cluster.clone()).unwrap_or_default(),
            "namespace": ns.map(|n| n.name.clone()).unwrap_or_default(),
            "environment": ns.map(|n| n.environment.clone()).unwrap_or_default(),
            "app": ns.map(|n| n.app.clone()).unwrap_or_default(),
        })
    }

    /// Expands a selector-bearing spec into one spec per matching
    /// namespace. A spec with an already-inline namespace expands to
    /// itself. Exclude wins over include on overlap; zero matching
    /// namespaces expands to zero specs (not an error).
    pub fn expand_namespaces(&self, namespaces: &[Namespace]) -> Result<Vec<Spec>> {
        let selector = match &self.namespace {
            NamespaceRef::Inline(_) => return Ok(vec![self.clone()]),
            NamespaceRef::Selector(selector) => selector,
        };

        let mut expanded = Vec::new();
        for namespace in namespaces {
            let doc = serde_json::to_value(namespace).context("serializing namespace")?;
            let included = selector
                .include
                .iter()
                .any(|path| jsonpath_matches(&doc, path));
            if !included {
                continue;
            }
            let excluded = selector
                .exclude
                .iter()
                .any(|path| jsonpath_matches(&doc, path));
            if excluded {
                continue;
            }
            let mut spec = self.clone();
            spec.namespace = NamespaceRef::Inline(namespace.clone());
            expanded.push(spec);
        }
        Ok(expanded)
    }
}

fn jsonpath_matches(doc: &Value, path: &str) -> bool {
    match doc.clone().path(path) {
        Ok(Value::Array(items)) => !items.is_empty(),
        Ok(Value::Null) => false,
        Ok(_) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(name: &str, env: &str) -> Namespace {
        Namespace {
            cluster: "appint-ex-01".to_string(),
            name: name.to_string(),
            app: "demo".to_string(),
            environment: env.to_string(),
        }
    }

    fn selector_spec(include: Vec<&str>, exclude: Vec<&str>) -> Spec {
        Spec {
            provision_provider: "aws".to_string(),
            provider: "rds".to_string(),
            identifier: "demo-db".to_string(),
            resource: serde_json::json!({}),
            provisioner: Provisioner {
                name: "acct-1".to_string(),
                resources_default_region: Some("us-east-1".to_string()),
                supported_deployment_regions: vec![],
                api_credentials: None,
            },
            namespace: NamespaceRef::Selector(NamespaceSelector {
                include: include.into_iter().map(str::to_string).collect(),
                exclude: exclude.into_iter().map(str::to_string).collect(),
            }),
            metadata: Metadata::default(),
        }
    }

    #[test]
    fn selector_with_no_matches_expands_to_zero_specs() {
        let spec = selector_spec(vec!["$[?(@.environment=='prod')]"], vec![]);
        let namespaces = vec![ns("staging-ns", "staging")];
        let expanded = spec.expand_namespaces(&namespaces).unwrap();
        assert!(expanded.is_empty());
    }

    #[test]
    fn exclude_wins_over_include_on_overlap() {
        let spec = selector_spec(
            vec!["$[?(@.environment=='prod')]"],
            vec!["$[?(@.name=='blocked')]"],
        );
        let namespaces = vec![ns("blocked", "prod"), ns("allowed", "prod")];
        let expanded = spec.expand_namespaces(&namespaces).unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].namespace().unwrap().name, "allowed");
    }

    #[test]
    fn inline_namespace_expands_to_itself() {
        let mut spec = selector_spec(vec![], vec![]);
        spec.namespace = NamespaceRef::Inline(ns("fixed", "prod"));
        let expanded = spec.expand_namespaces(&[]).unwrap();
        assert_eq!(expanded.len(), 1);
    }

    #[test]
    fn output_prefix_normalizes_underscores() {
        let spec = Spec {
            provider: "parameter_group".to_string(),
            ..selector_spec(vec![], vec![])
        };
        assert_eq!(spec.output_prefix(), "demo-db-parameter-group");
    }

    #[test]
    fn output_resource_name_defaults_to_prefix() {
        let spec = selector_spec(vec![], vec![]);
        assert_eq!(spec.output_resource_name(), "demo-db-rds");
    }

    #[test]
    fn output_resource_name_honors_explicit_override() {
        let mut spec = selector_spec(vec![], vec![]);
        spec.resource = serde_json::json!({"output_resource_name": "custom-name"});
        assert_eq!(spec.output_resource_name(), "custom-name");
    }
}
