//! Shared constants used throughout the reconciler.

/// Name this integration tags every managed AWS resource with.
pub const INTEGRATION_NAME: &str = "external-resources-manager";

/// Tags unconditionally applied to every AWS resource on top of the
/// per-namespace tag set, mirroring the original implementation's
/// hardcoded `default_tags`.
pub fn aws_default_tags() -> serde_json::Value {
    serde_json::json!([{"tags": {"app": "app-sre-infra"}}])
}

/// Secret annotation prefix used to mark output secrets written by module
/// containers in the worker namespace with the `ResourceKey` they came
/// from.
pub const SECRET_ANNOTATION_PREFIX: &str = "external-resources";

/// Kubernetes Secret data-key maximum length.
pub const SECRET_MAX_KEY_LENGTH: usize = 253;
