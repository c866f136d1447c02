//! `ResourceValueResolver` — merges a spec's declared overrides on top of a
//! provider-supplied defaults document, copying through any field the spec
//! doesn't override.

use serde_json::{Map, Value};

pub struct ResourceValueResolver<'a> {
    pub declared: &'a Value,
    pub defaults: &'a Value,
    /// When true, a resource with no explicit `value` field uses its own
    /// identifier as the value (the AWS default factory's behavior).
    pub identifier_as_value: bool,
    pub identifier: &'a str,
}

impl<'a> ResourceValueResolver<'a> {
    pub fn new(declared: &'a Value, defaults: &'a Value, identifier: &'a str) -> Self {
        Self {
            declared,
            defaults,
            identifier_as_value: false,
            identifier,
        }
    }

    pub fn identifier_as_value(mut self, enabled: bool) -> Self {
        self.identifier_as_value = enabled;
        self
    }

    /// Merges `defaults` and `declared` into a single map: every key in
    /// `defaults` is present unless `declared` overrides it, and every key
    /// only in `declared` passes through untouched.
    pub fn resolve(&self) -> Value {
        let mut merged = Map::new();
        if let Value::Object(defaults) = self.defaults {
            for (k, v) in defaults {
                merged.insert(k.clone(), v.clone());
            }
        }
        if let Value::Object(declared) = self.declared {
            for (k, v) in declared {
                merged.insert(k.clone(), v.clone());
            }
        }
        if self.identifier_as_value && !merged.contains_key("value") {
            merged.insert("value".to_string(), Value::String(self.identifier.to_string()));
        }
        Value::Object(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn declared_overrides_defaults() {
        let declared = json!({"size": "large"});
        let defaults = json!({"size": "small", "region": "us-east-1"});
        let resolved = ResourceValueResolver::new(&declared, &defaults, "demo").resolve();
        assert_eq!(resolved["size"], "large");
        assert_eq!(resolved["region"], "us-east-1");
    }

    #[test]
    fn identifier_as_value_fills_missing_value() {
        let declared = json!({});
        let defaults = json!({});
        let resolved = ResourceValueResolver::new(&declared, &defaults, "demo-db")
            .identifier_as_value(true)
            .resolve();
        assert_eq!(resolved["value"], "demo-db");
    }

    #[test]
    fn identifier_as_value_does_not_override_explicit_value() {
        let declared = json!({"value": "explicit"});
        let defaults = json!({});
        let resolved = ResourceValueResolver::new(&declared, &defaults, "demo-db")
            .identifier_as_value(true)
            .resolve();
        assert_eq!(resolved["value"], "explicit");
    }
}
