//! Per-provider module configuration: container images and reconcile
//! timing, resolved from the catalog's module declaration with per-spec
//! overrides layered on top.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu_request: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub memory_limit: String,
}

/// The catalog's declaration for a `(provision_provider, provider)` pair,
/// before any per-spec override is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub provision_provider: String,
    pub provider: String,
    pub image: String,
    pub version: String,
    pub outputs_secret_image: String,
    pub outputs_secret_version: String,
    pub reconcile_drift_interval_minutes: u32,
    pub reconcile_timeout_minutes: u32,
    pub resources: ResourceRequirements,
}

/// Per-spec overrides of a subset of `Module` fields, sourced from
/// `Spec.metadata.module_overrides`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOverrides {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub reconcile_drift_interval_minutes: Option<u32>,
    #[serde(default)]
    pub reconcile_timeout_minutes: Option<u32>,
}

/// The resolved configuration used to build a `Reconciliation` and the Job
/// manifest. `overridden` is provenance only — excluded from equality so
/// two configurations that resolve to the same image/version/timing compare
/// equal regardless of how they got there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfiguration {
    pub image: String,
    pub version: String,
    pub outputs_secret_image: String,
    pub outputs_secret_version: String,
    pub reconcile_drift_interval_minutes: u32,
    pub reconcile_timeout_minutes: u32,
    pub overridden: bool,
}

impl PartialEq for ModuleConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.image == other.image
            && self.version == other.version
            && self.outputs_secret_image == other.outputs_secret_image
            && self.outputs_secret_version == other.outputs_secret_version
            && self.reconcile_drift_interval_minutes == other.reconcile_drift_interval_minutes
            && self.reconcile_timeout_minutes == other.reconcile_timeout_minutes
    }
}
impl Eq for ModuleConfiguration {}

impl ModuleConfiguration {
    pub fn image_version(&self) -> String {
        format!("{}:{}", self.image, self.version)
    }

    pub fn outputs_secret_image_version(&self) -> String {
        format!("{}:{}", self.outputs_secret_image, self.outputs_secret_version)
    }

    /// Merges `overrides` on top of `module`'s declared defaults. Sets
    /// `overridden=true` iff at least one field was actually overridden.
    pub fn resolve(module: &Module, overrides: Option<&ModuleOverrides>) -> Self {
        let overrides = overrides.cloned().unwrap_or_default();
        let overridden = overrides.image.is_some()
            || overrides.version.is_some()
            || overrides.reconcile_drift_interval_minutes.is_some()
            || overrides.reconcile_timeout_minutes.is_some();

        Self {
            image: overrides.image.unwrap_or_else(|| module.image.clone()),
            version: overrides.version.unwrap_or_else(|| module.version.clone()),
            outputs_secret_image: module.outputs_secret_image.clone(),
            outputs_secret_version: module.outputs_secret_version.clone(),
            reconcile_drift_interval_minutes: overrides
                .reconcile_drift_interval_minutes
                .unwrap_or(module.reconcile_drift_interval_minutes),
            reconcile_timeout_minutes: overrides
                .reconcile_timeout_minutes
                .unwrap_or(module.reconcile_timeout_minutes),
            overridden,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> Module {
        Module {
            provision_provider: "aws".to_string(),
            provider: "rds".to_string(),
            image: "quay.io/app-sre/er-tf-module".to_string(),
            version: "1.0.0".to_string(),
            outputs_secret_image: "quay.io/app-sre/er-outputs".to_string(),
            outputs_secret_version: "1.0.0".to_string(),
            reconcile_drift_interval_minutes: 1440,
            reconcile_timeout_minutes: 1440,
            resources: ResourceRequirements {
                cpu_request: "100m".to_string(),
                memory_request: "128Mi".to_string(),
                cpu_limit: "200m".to_string(),
                memory_limit: "256Mi".to_string(),
            },
        }
    }

    #[test]
    fn no_overrides_means_not_overridden() {
        let conf = ModuleConfiguration::resolve(&module(), None);
        assert!(!conf.overridden);
        assert_eq!(conf.image_version(), "quay.io/app-sre/er-tf-module:1.0.0");
    }

    #[test]
    fn version_override_sets_overridden_flag() {
        let overrides = ModuleOverrides {
            version: Some("2.0.0".to_string()),
            ..Default::default()
        };
        let conf = ModuleConfiguration::resolve(&module(), Some(&overrides));
        assert!(conf.overridden);
        assert_eq!(conf.version, "2.0.0");
    }

    #[test]
    fn overridden_is_excluded_from_equality() {
        let a = ModuleConfiguration::resolve(&module(), None);
        let overrides = ModuleOverrides {
            image: Some(module().image),
            ..Default::default()
        };
        let b = ModuleConfiguration::resolve(&module(), Some(&overrides));
        assert_ne!(a.overridden, b.overridden);
        assert_eq!(a, b);
    }
}
