//! DynamoDB-shaped state store adapter (spec.md §6.4): the exact wire
//! layout the original implementation's `DynamoDBStateAdapter` used,
//! ported field-for-field so existing tables stay readable during
//! migration.

use crate::model::{
    Action, ModuleConfiguration, Reconciliation, ResourceKey, ResourceStatus, StateRecord,
};
use crate::state_store::{PartialRecord, StateStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

const ER_KEY_HASH: &str = "external_resource_key_hash";
const RESOURCE_STATUS: &str = "resource_status";
const TIMESTAMP: &str = "time_stamp";
const ER_KEY: &str = "external_resource_key";
const RECONC: &str = "reconciliation";
const RECONCILIATION_ERRORS: &str = "reconciliation_errors";

const RECONC_RESOURCE_HASH: &str = "resource_hash";
const RECONC_INPUT: &str = "input";
const RECONC_ACTION: &str = "action";
const MODCONF: &str = "module_configuration";
const MODCONF_IMAGE: &str = "image";
const MODCONF_VERSION: &str = "version";
const MODCONF_DRIFT_MINS: &str = "drift_detection_minutes";
const MODCONF_TIMEOUT_MINS: &str = "timeout_minutes";

pub struct DynamoDbStateStore {
    client: Client,
    table_name: String,
}

impl DynamoDbStateStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    fn serialize(&self, key: &ResourceKey, record: &StateRecord) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert(
            ER_KEY_HASH.to_string(),
            AttributeValue::S(key.state_path()),
        );
        item.insert(
            ER_KEY.to_string(),
            AttributeValue::M(HashMap::from([
                ("provision_provider".to_string(), AttributeValue::S(key.provision_provider.clone())),
                ("provisioner_name".to_string(), AttributeValue::S(key.provisioner_name.clone())),
                ("provider".to_string(), AttributeValue::S(key.provider.clone())),
                ("identifier".to_string(), AttributeValue::S(key.identifier.clone())),
            ])),
        );
        item.insert(
            RESOURCE_STATUS.to_string(),
            AttributeValue::S(status_to_str(record.resource_status).to_string()),
        );
        item.insert(
            TIMESTAMP.to_string(),
            AttributeValue::S(record.ts.to_rfc3339()),
        );
        item.insert(
            RECONCILIATION_ERRORS.to_string(),
            AttributeValue::N(record.reconciliation_errors.to_string()),
        );
        if let Some(r) = &record.reconciliation {
            item.insert(RECONC.to_string(), AttributeValue::M(serialize_reconciliation(r)));
        }
        item
    }

    fn deserialize(&self, item: &HashMap<String, AttributeValue>, partial: bool) -> Result<StateRecord> {
        let resource_status = item
            .get(RESOURCE_STATUS)
            .and_then(|v| v.as_s().ok())
            .and_then(|s| status_from_str(s))
            .context("missing or invalid resource_status")?;

        let ts = item
            .get(TIMESTAMP)
            .and_then(|v| v.as_s().ok())
            .map(|s| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .context("invalid time_stamp")?
            .unwrap_or_else(Utc::now);

        let reconciliation_errors = item
            .get(RECONCILIATION_ERRORS)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);

        let reconciliation = match item.get(RECONC).and_then(|v| v.as_m().ok()) {
            Some(m) => Some(deserialize_reconciliation(m, partial)?),
            None => None,
        };

        Ok(StateRecord {
            resource_status,
            ts,
            reconciliation,
            reconciliation_errors,
        })
    }
}

fn serialize_reconciliation(r: &Reconciliation) -> HashMap<String, AttributeValue> {
    let mut m = HashMap::new();
    m.insert(RECONC_RESOURCE_HASH.to_string(), AttributeValue::S(r.resource_hash.clone()));
    m.insert(RECONC_INPUT.to_string(), AttributeValue::S(r.input.clone()));
    m.insert(
        RECONC_ACTION.to_string(),
        AttributeValue::S(action_to_str(r.action).to_string()),
    );
    m.insert(
        MODCONF.to_string(),
        AttributeValue::M(HashMap::from([
            (MODCONF_IMAGE.to_string(), AttributeValue::S(r.module_configuration.image.clone())),
            (MODCONF_VERSION.to_string(), AttributeValue::S(r.module_configuration.version.clone())),
            (
                MODCONF_DRIFT_MINS.to_string(),
                AttributeValue::N(r.module_configuration.reconcile_drift_interval_minutes.to_string()),
            ),
            (
                MODCONF_TIMEOUT_MINS.to_string(),
                AttributeValue::N(r.module_configuration.reconcile_timeout_minutes.to_string()),
            ),
        ])),
    );
    m
}

/// `partial_data=true` tolerates missing fields beyond the projected set
/// (`{resource_hash}` only), building a minimal `Reconciliation` with
/// everything else defaulted.
fn deserialize_reconciliation(
    m: &HashMap<String, AttributeValue>,
    partial: bool,
) -> Result<Reconciliation> {
    let resource_hash = m
        .get(RECONC_RESOURCE_HASH)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .unwrap_or_default();

    if partial {
        return Ok(Reconciliation {
            key: ResourceKey::new("", "", "", ""),
            action: Action::Apply,
            resource_hash,
            input: String::new(),
            module_configuration: ModuleConfiguration {
                image: String::new(),
                version: String::new(),
                outputs_secret_image: String::new(),
                outputs_secret_version: String::new(),
                reconcile_drift_interval_minutes: 0,
                reconcile_timeout_minutes: 0,
                overridden: false,
            },
            linked_resources: None,
            dry_run: false,
        });
    }

    let input = m.get(RECONC_INPUT).and_then(|v| v.as_s().ok()).cloned().unwrap_or_default();
    let action = m
        .get(RECONC_ACTION)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| action_from_str(s))
        .context("missing or invalid reconciliation.action")?;
    let modconf = m
        .get(MODCONF)
        .and_then(|v| v.as_m().ok())
        .context("missing reconciliation.module_configuration")?;
    let module_configuration = ModuleConfiguration {
        image: modconf.get(MODCONF_IMAGE).and_then(|v| v.as_s().ok()).cloned().unwrap_or_default(),
        version: modconf.get(MODCONF_VERSION).and_then(|v| v.as_s().ok()).cloned().unwrap_or_default(),
        outputs_secret_image: String::new(),
        outputs_secret_version: String::new(),
        reconcile_drift_interval_minutes: modconf
            .get(MODCONF_DRIFT_MINS)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
        reconcile_timeout_minutes: modconf
            .get(MODCONF_TIMEOUT_MINS)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
        overridden: false,
    };

    Ok(Reconciliation {
        key: ResourceKey::new("", "", "", ""),
        action,
        resource_hash,
        input,
        module_configuration,
        linked_resources: None,
        dry_run: false,
    })
}

fn status_to_str(status: ResourceStatus) -> &'static str {
    match status {
        ResourceStatus::NotExists => "NOT_EXISTS",
        ResourceStatus::InProgress => "IN_PROGRESS",
        ResourceStatus::DeleteInProgress => "DELETE_IN_PROGRESS",
        ResourceStatus::Created => "CREATED",
        ResourceStatus::Deleted => "DELETED",
        ResourceStatus::PendingSecretSync => "PENDING_SECRET_SYNC",
        ResourceStatus::Error => "ERROR",
        ResourceStatus::ReconciliationRequested => "RECONCILIATION_REQUESTED",
        ResourceStatus::Abandoned => "ABANDONED",
    }
}

fn status_from_str(s: &str) -> Option<ResourceStatus> {
    Some(match s {
        "NOT_EXISTS" => ResourceStatus::NotExists,
        "IN_PROGRESS" => ResourceStatus::InProgress,
        "DELETE_IN_PROGRESS" => ResourceStatus::DeleteInProgress,
        "CREATED" => ResourceStatus::Created,
        "DELETED" => ResourceStatus::Deleted,
        "PENDING_SECRET_SYNC" => ResourceStatus::PendingSecretSync,
        "ERROR" => ResourceStatus::Error,
        "RECONCILIATION_REQUESTED" => ResourceStatus::ReconciliationRequested,
        "ABANDONED" => ResourceStatus::Abandoned,
        _ => return None,
    })
}

fn action_to_str(action: Action) -> &'static str {
    match action {
        Action::Apply => "APPLY",
        Action::Destroy => "DESTROY",
    }
}

fn action_from_str(s: &str) -> Option<Action> {
    Some(match s {
        "APPLY" => Action::Apply,
        "DESTROY" => Action::Destroy,
        _ => return None,
    })
}

#[async_trait]
impl StateStore for DynamoDbStateStore {
    async fn get(&self, key: &ResourceKey) -> Result<StateRecord> {
        for partition_key in [key.state_path(), key.legacy_hash()] {
            let resp = self
                .client
                .get_item()
                .table_name(&self.table_name)
                .key(ER_KEY_HASH, AttributeValue::S(partition_key))
                .consistent_read(true)
                .send()
                .await
                .context("dynamodb get_item failed")?;
            if let Some(item) = resp.item() {
                let mut record = self.deserialize(item, false)?;
                record.reconciliation = record.reconciliation.map(|mut r| {
                    r.key = key.clone();
                    r
                });
                return Ok(record);
            }
        }
        Ok(StateRecord::not_exists(Utc::now()))
    }

    async fn put(&self, key: &ResourceKey, record: &StateRecord) -> Result<()> {
        let item = self.serialize(key, record);
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .context("dynamodb put_item failed")?;
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(ER_KEY_HASH, AttributeValue::S(key.state_path()))
            .send()
            .await
            .context("dynamodb delete_item failed")?;
        Ok(())
    }

    async fn scan_partial(&self) -> Result<Vec<PartialRecord>> {
        let mut records = Vec::new();
        let mut exclusive_start_key = None;
        loop {
            let mut request = self
                .client
                .scan()
                .table_name(&self.table_name)
                .projection_expression(format!(
                    "{ER_KEY}, {RESOURCE_STATUS}, {RECONC}.{RECONC_RESOURCE_HASH}"
                ));
            if let Some(start) = exclusive_start_key.take() {
                request = request.set_exclusive_start_key(Some(start));
            }
            let resp = request.send().await.context("dynamodb scan failed")?;
            for item in resp.items() {
                let status = item
                    .get(RESOURCE_STATUS)
                    .and_then(|v| v.as_s().ok())
                    .and_then(|s| status_from_str(s));
                let er_key = item.get(ER_KEY).and_then(|v| v.as_m().ok());
                let (Some(status), Some(er_key)) = (status, er_key) else {
                    continue;
                };
                let key = ResourceKey::new(
                    er_key.get("provision_provider").and_then(|v| v.as_s().ok()).cloned().unwrap_or_default(),
                    er_key.get("provisioner_name").and_then(|v| v.as_s().ok()).cloned().unwrap_or_default(),
                    er_key.get("provider").and_then(|v| v.as_s().ok()).cloned().unwrap_or_default(),
                    er_key.get("identifier").and_then(|v| v.as_s().ok()).cloned().unwrap_or_default(),
                );
                let resource_hash = item
                    .get(RECONC)
                    .and_then(|v| v.as_m().ok())
                    .and_then(|m| m.get(RECONC_RESOURCE_HASH))
                    .and_then(|v| v.as_s().ok())
                    .cloned();
                records.push(PartialRecord { key, status, resource_hash });
            }
            exclusive_start_key = resp.last_evaluated_key().cloned();
            if exclusive_start_key.is_none() {
                break;
            }
        }
        Ok(records)
    }

    async fn update_status(&self, key: &ResourceKey, status: ResourceStatus) -> Result<()> {
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key(ER_KEY_HASH, AttributeValue::S(key.state_path()))
            .update_expression(format!("SET {RESOURCE_STATUS} = :new_value"))
            .expression_attribute_values(
                ":new_value",
                AttributeValue::S(status_to_str(status).to_string()),
            )
            .send()
            .await
            .context("dynamodb update_item failed")?;
        Ok(())
    }
}
