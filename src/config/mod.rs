//! # Settings
//!
//! Environment-driven configuration for the manager binary. Mirrors the
//! catalog's `Settings` object (state-store table, worker cluster/namespace,
//! default images) while staying independently constructible for tests.

use std::str::FromStr;
use std::time::Duration;

/// Top-level manager configuration, loaded once at process start.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Name of the state-store table (DynamoDB table name or equivalent).
    pub state_table_name: String,
    /// AWS account/profile the state store lives in.
    pub state_account_name: String,
    /// Cluster jobs are dispatched into.
    pub workers_cluster: String,
    /// Namespace jobs are dispatched into.
    pub workers_namespace: String,
    /// Default module-container image used when a module doesn't declare one.
    pub default_image: String,
    /// Default module-container version used when a module doesn't declare one.
    pub default_version: String,
    /// Default outputs-secret sidecar image.
    pub default_outputs_secret_image: String,
    /// Default outputs-secret sidecar version.
    pub default_outputs_secret_version: String,
    /// Default reconcile_drift_interval_minutes when a module doesn't declare one.
    pub default_drift_interval_minutes: u32,
    /// Default reconcile_timeout_minutes when a module doesn't declare one.
    pub default_timeout_minutes: u32,
    /// Size of the worker pool used for dry-run dispatch and log fetching.
    pub thread_pool_size: usize,
    /// Suffix appended to dry-run job names (distinguishes concurrent dry
    /// runs, e.g. a merge-request number).
    pub dry_run_job_suffix: String,
    /// Image pull secret name used on dispatched jobs.
    pub image_pull_secret: String,
    /// Service account jobs run under.
    pub service_account: String,
    /// Port the metrics/health HTTP server listens on.
    pub metrics_port: u16,
    /// Interval between manager loop invocations in `reconcile` (non-`--once`) mode.
    pub loop_interval_secs: u64,
    /// Terraform state bucket the module-type-specific provision data points
    /// modules at (`ModuleProvisionData::Terraform`).
    pub tf_state_bucket: String,
    /// Region of the Terraform state bucket/lock table above.
    pub tf_state_region: String,
    /// DynamoDB table used for Terraform state locking (distinct from the
    /// manager's own `state_table_name`, which tracks resource lifecycle).
    pub tf_state_dynamodb_table: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_table_name: "external-resources-state".to_string(),
            state_account_name: "app-sre".to_string(),
            workers_cluster: "appint-ex-01".to_string(),
            workers_namespace: "external-resources-poc".to_string(),
            default_image: "quay.io/app-sre/external-resources-tf-module".to_string(),
            default_version: "latest".to_string(),
            default_outputs_secret_image: "quay.io/app-sre/external-resources-outputs".to_string(),
            default_outputs_secret_version: "latest".to_string(),
            default_drift_interval_minutes: 1440,
            default_timeout_minutes: 1440,
            thread_pool_size: 10,
            dry_run_job_suffix: "mr".to_string(),
            image_pull_secret: "quay.io".to_string(),
            service_account: "external-resources-sa".to_string(),
            metrics_port: 5000,
            loop_interval_secs: 60,
            tf_state_bucket: "external-resources-terraform-state".to_string(),
            tf_state_region: "us-east-1".to_string(),
            tf_state_dynamodb_table: "external-resources-terraform-lock".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to [`Default`] for
    /// anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            state_table_name: env_var_or_default_str(
                "ERM_STATE_TABLE_NAME",
                &defaults.state_table_name,
            ),
            state_account_name: env_var_or_default_str(
                "ERM_STATE_ACCOUNT_NAME",
                &defaults.state_account_name,
            ),
            workers_cluster: env_var_or_default_str(
                "ERM_WORKERS_CLUSTER",
                &defaults.workers_cluster,
            ),
            workers_namespace: env_var_or_default_str(
                "ERM_WORKERS_NAMESPACE",
                &defaults.workers_namespace,
            ),
            default_image: env_var_or_default_str("ERM_DEFAULT_IMAGE", &defaults.default_image),
            default_version: env_var_or_default_str(
                "ERM_DEFAULT_VERSION",
                &defaults.default_version,
            ),
            default_outputs_secret_image: env_var_or_default_str(
                "ERM_DEFAULT_OUTPUTS_SECRET_IMAGE",
                &defaults.default_outputs_secret_image,
            ),
            default_outputs_secret_version: env_var_or_default_str(
                "ERM_DEFAULT_OUTPUTS_SECRET_VERSION",
                &defaults.default_outputs_secret_version,
            ),
            default_drift_interval_minutes: env_var_or_default(
                "ERM_DEFAULT_DRIFT_INTERVAL_MINUTES",
                defaults.default_drift_interval_minutes,
            ),
            default_timeout_minutes: env_var_or_default(
                "ERM_DEFAULT_TIMEOUT_MINUTES",
                defaults.default_timeout_minutes,
            ),
            thread_pool_size: env_var_or_default(
                "ERM_THREAD_POOL_SIZE",
                defaults.thread_pool_size,
            ),
            dry_run_job_suffix: env_var_or_default_str(
                "ERM_DRY_RUN_JOB_SUFFIX",
                &defaults.dry_run_job_suffix,
            ),
            image_pull_secret: env_var_or_default_str(
                "ERM_IMAGE_PULL_SECRET",
                &defaults.image_pull_secret,
            ),
            service_account: env_var_or_default_str(
                "ERM_SERVICE_ACCOUNT",
                &defaults.service_account,
            ),
            metrics_port: env_var_or_default("ERM_METRICS_PORT", defaults.metrics_port),
            loop_interval_secs: env_var_or_default(
                "ERM_LOOP_INTERVAL_SECS",
                defaults.loop_interval_secs,
            ),
            tf_state_bucket: env_var_or_default_str(
                "ERM_TF_STATE_BUCKET",
                &defaults.tf_state_bucket,
            ),
            tf_state_region: env_var_or_default_str(
                "ERM_TF_STATE_REGION",
                &defaults.tf_state_region,
            ),
            tf_state_dynamodb_table: env_var_or_default_str(
                "ERM_TF_STATE_DYNAMODB_TABLE",
                &defaults.tf_state_dynamodb_table,
            ),
        }
    }

    pub fn default_drift_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.default_drift_interval_minutes) * 60)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.default_timeout_minutes) * 60)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_secs)
    }
}

fn env_var_or_default<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        let s = Settings::default();
        assert_eq!(s.default_drift_interval_minutes, 1440);
        assert_eq!(s.default_timeout_minutes, 1440);
        assert_eq!(s.default_timeout(), Duration::from_secs(1440 * 60));
    }

    #[test]
    fn env_override_falls_back_on_missing_var() {
        let v: u16 = env_var_or_default("ERM_DOES_NOT_EXIST_12345", 5000);
        assert_eq!(v, 5000);
    }
}
