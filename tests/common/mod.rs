//! In-memory fakes for the manager's external collaborators, shared across
//! the scenario tests in this directory.

use async_trait::async_trait;
use chrono::Utc;
use external_resources_manager::job::manifest::JobManifest;
use external_resources_manager::job::{ConcurrencyPolicy, JobController, ReconcileStatus};
use external_resources_manager::model::{ResourceKey, ResourceStatus, Spec, StateRecord};
use external_resources_manager::secrets_sync::SecretsSynchroniser;
use external_resources_manager::state_store::{PartialRecord, StateStore};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct FakeStateStore {
    records: Mutex<HashMap<ResourceKey, StateRecord>>,
}

impl FakeStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: ResourceKey, record: StateRecord) {
        self.records.lock().unwrap().insert(key, record);
    }
}

#[async_trait]
impl StateStore for FakeStateStore {
    async fn get(&self, key: &ResourceKey) -> anyhow::Result<StateRecord> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| StateRecord::not_exists(Utc::now())))
    }

    async fn put(&self, key: &ResourceKey, record: &StateRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().insert(key.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> anyhow::Result<()> {
        self.records.lock().unwrap().remove(key);
        Ok(())
    }

    async fn scan_partial(&self) -> anyhow::Result<Vec<PartialRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|(key, record)| PartialRecord {
                key: key.clone(),
                status: record.resource_status,
                resource_hash: record.reconciliation.as_ref().map(|r| r.resource_hash.clone()),
            })
            .collect())
    }

    async fn update_status(&self, key: &ResourceKey, status: ResourceStatus) -> anyhow::Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry(key.clone())
            .or_insert_with(|| StateRecord::not_exists(Utc::now()));
        record.resource_status = status;
        record.ts = Utc::now();
        Ok(())
    }
}

/// Every job this controller is asked about reports `default_status`
/// unless `statuses` carries a more specific entry for that job name.
///
/// `JobReconciler<C>` owns its controller by value, so this wraps its state
/// in an `Arc` internally and derives `Clone` — one clone moves into the
/// reconciler, another stays with the test for assertions.
#[derive(Clone)]
pub struct FakeJobController {
    inner: Arc<FakeJobControllerInner>,
}

struct FakeJobControllerInner {
    default_status: ReconcileStatus,
    statuses: Mutex<HashMap<String, ReconcileStatus>>,
    dispatched: Mutex<Vec<String>>,
}

impl FakeJobController {
    pub fn new(default_status: ReconcileStatus) -> Self {
        Self {
            inner: Arc::new(FakeJobControllerInner {
                default_status,
                statuses: Mutex::new(HashMap::new()),
                dispatched: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_status(&self, job_name: impl Into<String>, status: ReconcileStatus) {
        self.inner.statuses.lock().unwrap().insert(job_name.into(), status);
    }

    pub fn dispatched_count(&self) -> usize {
        self.inner.dispatched.lock().unwrap().len()
    }
}

#[async_trait]
impl JobController for FakeJobController {
    async fn enqueue_job(&self, manifest: &JobManifest, _policy: ConcurrencyPolicy) -> anyhow::Result<()> {
        let name = manifest
            .job
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| "unnamed".to_string());
        self.inner.dispatched.lock().unwrap().push(name);
        Ok(())
    }

    async fn get_job_status(&self, job_name: &str) -> anyhow::Result<ReconcileStatus> {
        Ok(self
            .inner
            .statuses
            .lock()
            .unwrap()
            .get(job_name)
            .copied()
            .unwrap_or(self.inner.default_status))
    }

    async fn get_success_job_duration(&self, job_name: &str) -> anyhow::Result<Option<Duration>> {
        Ok(match self.get_job_status(job_name).await? {
            ReconcileStatus::Success => Some(Duration::from_secs(5)),
            _ => None,
        })
    }

    async fn wait_for_job_list_completion(
        &self,
        job_names: &[String],
        _check_interval: Duration,
        _timeout: Option<Duration>,
    ) -> anyhow::Result<HashMap<String, ReconcileStatus>> {
        let mut out = HashMap::new();
        for name in job_names {
            out.insert(name.clone(), self.get_job_status(name).await?);
        }
        Ok(out)
    }

    async fn get_job_logs(&self, job_name: &str, out: &mut dyn std::io::Write) -> anyhow::Result<()> {
        writeln!(out, "fake logs for {job_name}")?;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSecretsSynchroniser {
    pub failing: Mutex<BTreeSet<ResourceKey>>,
    pub calls: Mutex<Vec<Vec<ResourceKey>>>,
}

impl FakeSecretsSynchroniser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, key: ResourceKey) {
        self.failing.lock().unwrap().insert(key);
    }
}

#[async_trait]
impl SecretsSynchroniser for FakeSecretsSynchroniser {
    async fn sync_secrets(&self, specs: &[Spec]) -> BTreeSet<ResourceKey> {
        self.calls
            .lock()
            .unwrap()
            .push(specs.iter().map(Spec::key).collect());
        let failing = self.failing.lock().unwrap();
        specs
            .iter()
            .map(Spec::key)
            .filter(|k| failing.contains(k))
            .collect()
    }
}
