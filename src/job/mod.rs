//! Job reconciler (spec.md §4.5): turns a `Reconciliation` into a
//! Kubernetes Job and tracks it to completion through a narrow
//! `JobController` seam.

pub mod k8s;
pub mod manifest;

use crate::config::Settings;
use crate::model::Reconciliation;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Terminal (or pending) state of a dispatched job, as observed by the
/// manager (spec.md §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStatus {
    Success,
    Error,
    InProgress,
    NotExists,
}

/// Which already-dispatched jobs `enqueue_job` is allowed to replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyPolicy {
    pub replace_failed: bool,
    pub replace_finished: bool,
    pub replace_in_progress: bool,
}

impl ConcurrencyPolicy {
    /// Live-run policy: replace a failed or already-finished job with the
    /// same name, but never cancel one still running.
    pub fn normal() -> Self {
        Self {
            replace_failed: true,
            replace_finished: true,
            replace_in_progress: false,
        }
    }

    /// Dry-run policy: additionally replace an in-progress job — a stale
    /// dry run of an outdated spec must not block a fresh one.
    pub fn dry_run() -> Self {
        Self {
            replace_failed: true,
            replace_finished: true,
            replace_in_progress: true,
        }
    }
}

/// The Kubernetes Job controller contract the manager consumes (spec.md
/// §6.2). The concrete `kube`-backed implementation lives in [`k8s`].
#[async_trait]
pub trait JobController: Send + Sync {
    /// Idempotent: dispatching the same job name twice under a policy that
    /// doesn't permit replacement is a no-op.
    async fn enqueue_job(
        &self,
        manifest: &manifest::JobManifest,
        policy: ConcurrencyPolicy,
    ) -> Result<()>;

    async fn get_job_status(&self, job_name: &str) -> Result<ReconcileStatus>;

    /// `None` if the job never completed successfully (still running, or
    /// never existed).
    async fn get_success_job_duration(&self, job_name: &str) -> Result<Option<Duration>>;

    /// Polls until every named job has a terminal status or `timeout`
    /// elapses. `timeout = None` means no timeout.
    async fn wait_for_job_list_completion(
        &self,
        job_names: &[String],
        check_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<HashMap<String, ReconcileStatus>>;

    /// Writes the job's pod logs to `out`.
    async fn get_job_logs(&self, job_name: &str, out: &mut dyn std::io::Write) -> Result<()>;
}

/// Deterministic job name for a `Reconciliation`: `prefix-<truncated
/// identifier>-<digest>`. Two reconciliations with equal identity fields
/// (key, action, dry_run) yield the same name — the idempotency the
/// concurrency policy relies on.
pub fn job_name(reconciliation: &Reconciliation, dry_run_job_suffix: &str) -> String {
    let prefix = if reconciliation.dry_run {
        format!("er-dry-run-{dry_run_job_suffix}")
    } else {
        "er".to_string()
    };

    let identifier = &reconciliation.key.identifier;
    let truncated: String = identifier.chars().take(20).collect();
    let truncated = truncated.trim_end_matches('-');

    let digest_input = format!(
        "{}|{}|{:?}",
        reconciliation.key.state_path(),
        match reconciliation.action {
            crate::model::Action::Apply => "APPLY",
            crate::model::Action::Destroy => "DESTROY",
        },
        reconciliation.dry_run,
    );
    let digest = format!("{:x}", md5::compute(digest_input.as_bytes()));
    let digest = &digest[..10];

    format!("{prefix}-{truncated}-{digest}")
}

/// Orchestrates manifest construction, dispatch, status polling and log
/// retrieval for reconciliations — the glue between the manager's decision
/// engine and the `JobController` contract.
pub struct JobReconciler<C: JobController> {
    controller: C,
    settings: Settings,
}

impl<C: JobController> JobReconciler<C> {
    pub fn new(controller: C, settings: Settings) -> Self {
        Self { controller, settings }
    }

    pub fn job_name_for(&self, reconciliation: &Reconciliation) -> String {
        job_name(reconciliation, &self.settings.dry_run_job_suffix)
    }

    pub async fn reconcile(&self, reconciliation: &Reconciliation) -> Result<()> {
        let name = self.job_name_for(reconciliation);
        let manifest = manifest::build_job_manifest(reconciliation, &name, &self.settings);
        let policy = if reconciliation.dry_run {
            ConcurrencyPolicy::dry_run()
        } else {
            ConcurrencyPolicy::normal()
        };
        self.controller.enqueue_job(&manifest, policy).await
    }

    /// `get_resource_reconcile_status` from spec.md §4.5: a vanished job
    /// (`NotExists`) is surfaced as-is here; the manager's decision engine
    /// is the one that treats it as an error outcome.
    pub async fn status(&self, reconciliation: &Reconciliation) -> Result<ReconcileStatus> {
        let name = self.job_name_for(reconciliation);
        self.controller.get_job_status(&name).await
    }

    pub async fn wait_for_completion(
        &self,
        reconciliations: &[Reconciliation],
        check_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<HashMap<String, ReconcileStatus>> {
        let names: Vec<String> = reconciliations.iter().map(|r| self.job_name_for(r)).collect();
        self.controller
            .wait_for_job_list_completion(&names, check_interval, timeout)
            .await
    }

    /// Fetches logs for `reconciliation`'s job, honoring its own `dry_run`
    /// flag for job-name resolution (the original implementation always
    /// resolved the dry-run naming scheme here regardless of the actual
    /// run mode; fixed on this port — see DESIGN.md).
    pub async fn logs(
        &self,
        reconciliation: &Reconciliation,
        out: &mut dyn std::io::Write,
    ) -> Result<()> {
        let name = self.job_name_for(reconciliation);
        self.controller.get_job_logs(&name, out).await
    }
}
