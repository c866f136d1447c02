//! The control loop (spec.md §4.4): assembles desired/deletion
//! reconciliations from the inventory, polls in-flight jobs, applies the
//! reconcile-needed decision table, and hands completed resources to the
//! secret synchroniser. Live and dry-run modes share the same decision
//! engine and manifest builder, diverging only in concurrency, waiting, and
//! whether state is written (spec.md §9).

use crate::config::Settings;
use crate::error::Error;
use crate::factory::{ExternalResourceFactory, ObjectFactory};
use crate::inventory::Inventory;
use crate::job::{JobController, JobReconciler, ReconcileStatus};
use crate::model::{
    Action, Module, ModuleConfiguration, ModuleOverrides, Reconciliation, ReconcileAction,
    ResourceKey, ResourceRequirements, ResourceStatus, Spec, StateRecord,
};
use crate::secrets_sync::SecretsSynchroniser;
use crate::state_store::StateStore;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeSet, HashMap};
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Wires the inventory against durable state, a job reconciler and a secret
/// synchroniser. One instance drives both the `reconcile` and `dry-run`
/// entry points (`ermctl`/the binary's main loop).
pub struct Manager<C: JobController> {
    state_store: Arc<dyn StateStore>,
    job_reconciler: JobReconciler<C>,
    factories: ObjectFactory<dyn ExternalResourceFactory>,
    modules: HashMap<(String, String), Module>,
    secrets_sync: Arc<dyn SecretsSynchroniser>,
    settings: Settings,
}

impl<C: JobController> Manager<C> {
    pub fn new(
        state_store: Arc<dyn StateStore>,
        job_reconciler: JobReconciler<C>,
        factories: ObjectFactory<dyn ExternalResourceFactory>,
        modules: Vec<Module>,
        secrets_sync: Arc<dyn SecretsSynchroniser>,
        settings: Settings,
    ) -> Self {
        let modules = modules
            .into_iter()
            .map(|m| ((m.provision_provider.clone(), m.provider.clone()), m))
            .collect();
        Self {
            state_store,
            job_reconciler,
            factories,
            modules,
            secrets_sync,
            settings,
        }
    }

    /// One live-mode loop invocation (`handle_resources` in the original
    /// implementation): dispatches jobs, advances state, syncs secrets.
    pub async fn run_once(&self, inventory: &Inventory) -> Result<(), Error> {
        self.check_orphans(inventory).await?;

        let (desired, errors) = self.get_desired_objects_reconciliations(inventory, false).await?;
        let deleted = self.get_deleted_objects_reconciliations(inventory, false).await?;

        let mut to_sync_keys: BTreeSet<ResourceKey> = BTreeSet::new();

        for r in desired.iter().chain(deleted.iter()) {
            let mut state = self
                .state_store
                .get(&r.key)
                .await
                .map_err(Error::TransientStore)?;

            if self.update_in_progress_state(r, &mut state).await? {
                to_sync_keys.insert(r.key.clone());
            }

            crate::metrics::set_reconcile_errors(&r.key, state.reconciliation_errors);

            let action = self.decide(r, &state);
            if action.needs_dispatch() {
                info!(key = %r.key, action = ?action, reason = action.reason(), "reconciling resource");
                self.job_reconciler
                    .reconcile(r)
                    .await
                    .map_err(Error::TransientStore)?;
                crate::metrics::increment_reconciliations_dispatched();
                self.update_state(r, &mut state).await?;
            }
        }

        let pending = self
            .state_store
            .keys_by_status(ResourceStatus::PendingSecretSync)
            .await
            .map_err(Error::TransientStore)?;
        to_sync_keys.extend(pending);

        if !to_sync_keys.is_empty() {
            self.sync_secrets(inventory, &to_sync_keys).await;
        }

        for (key, err) in &errors {
            error!(key = %key, error = %err, "validation error building desired resource; skipped this pass");
        }

        Ok(())
    }

    /// The pre-merge dry-run entry point (`handle_dry_run_resources`):
    /// dispatches only reconciliations whose hash actually differs from
    /// stored state (APPLY) or any DESTROY, fans out with a bounded worker
    /// pool, waits for completion with no timeout, surfaces logs, and never
    /// writes state.
    pub async fn run_dry_run(&self, inventory: &Inventory) -> Result<(), Error> {
        self.check_orphans(inventory).await?;

        let (desired, errors) = self.get_desired_objects_reconciliations(inventory, true).await?;
        let deleted = self.get_deleted_objects_reconciliations(inventory, true).await?;
        let all: Vec<Reconciliation> = desired.into_iter().chain(deleted).collect();

        let mut triggered = Vec::new();
        for r in &all {
            let state = self
                .state_store
                .get(&r.key)
                .await
                .map_err(Error::TransientStore)?;
            let stale = match r.action {
                Action::Apply => match &state.reconciliation {
                    Some(prior) => prior.resource_hash != r.resource_hash,
                    None => true,
                },
                Action::Destroy => true,
            };
            if stale {
                triggered.push(r.clone());
            }
        }

        let pool_size = self.settings.thread_pool_size.max(1);
        stream::iter(triggered.iter().map(|r| self.job_reconciler.reconcile(r)))
            .buffer_unordered(pool_size)
            .try_collect::<Vec<()>>()
            .await
            .map_err(Error::TransientStore)?;

        let results = self
            .job_reconciler
            .wait_for_completion(&triggered, Duration::from_secs(10), None)
            .await
            .map_err(Error::TransientStore)?;

        for r in &triggered {
            let mut buf = Vec::new();
            match self.job_reconciler.logs(r, &mut buf).await {
                Ok(()) => {
                    let _ = std::io::stdout().write_all(&buf);
                }
                Err(e) => warn!(key = %r.key, error = %e, "failed to fetch dry-run job logs"),
            }
        }

        let mut failed: Vec<ResourceKey> = results
            .iter()
            .filter(|(_, status)| matches!(status, ReconcileStatus::Error | ReconcileStatus::NotExists))
            .filter_map(|(name, _)| {
                triggered
                    .iter()
                    .find(|r| self.job_reconciler.job_name_for(r) == *name)
                    .map(|r| r.key.clone())
            })
            .collect();
        failed.extend(errors.keys().cloned());

        if !failed.is_empty() {
            return Err(Error::DryRunFailed(failed));
        }
        Ok(())
    }

    /// Scans the store for keys with no corresponding inventory spec
    /// (spec.md §4.4 step 2, §8 scenario 5). Fatal — operators must add a
    /// `delete=true` spec to clear an orphan, the core does not GC on its
    /// own.
    async fn check_orphans(&self, inventory: &Inventory) -> Result<(), Error> {
        let partials = self
            .state_store
            .scan_partial()
            .await
            .map_err(Error::TransientStore)?;

        let orphans: Vec<ResourceKey> = partials
            .into_iter()
            .filter(|p| !p.status.does_not_exist() && inventory.get(&p.key).is_none())
            .map(|p| p.key)
            .collect();

        if orphans.is_empty() {
            Ok(())
        } else {
            for key in &orphans {
                error!(key = %key, "orphaned state record with no matching spec in the inventory");
            }
            Err(Error::OrphanedResources(orphans))
        }
    }

    /// Builds one `Reconciliation(action=APPLY)` per non-deleted spec.
    /// Validation-class failures are captured per-key and the spec is
    /// skipped (fail-soft); anything else aborts the loop.
    async fn get_desired_objects_reconciliations(
        &self,
        inventory: &Inventory,
        dry_run: bool,
    ) -> Result<(Vec<Reconciliation>, HashMap<ResourceKey, Error>), Error> {
        let mut out = Vec::new();
        let mut errors = HashMap::new();

        for (key, spec) in inventory.items() {
            if spec.marked_to_delete() {
                continue;
            }

            let module_conf = match self.resolve_module_configuration(spec) {
                Ok(m) => m,
                Err(e) => {
                    errors.insert(key.clone(), e);
                    continue;
                }
            };

            let factory = self.factories.get(&spec.provision_provider);
            let resource = match factory
                .create_external_resource(spec, &module_conf, inventory)
                .await
            {
                Ok(r) => r,
                Err(e) if e.is_validation_class() => {
                    errors.insert(key.clone(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = factory.validate_external_resource(&resource, &module_conf) {
                if e.is_validation_class() {
                    errors.insert(key.clone(), e);
                    continue;
                }
                return Err(e);
            }

            let linked_resources = factory.find_linked_resources(spec, inventory);

            out.push(Reconciliation {
                key: key.clone(),
                action: Action::Apply,
                resource_hash: resource.hash(),
                input: resource.serialized_input(),
                module_configuration: module_conf,
                linked_resources: Some(linked_resources),
                dry_run,
            });
        }

        Ok((out, errors))
    }

    /// Builds one `Reconciliation(action=DESTROY)` per spec marked
    /// `delete=true`, reusing the *state-recorded* hash/input/module
    /// configuration rather than a freshly resolved one (§8 invariant 3).
    async fn get_deleted_objects_reconciliations(
        &self,
        inventory: &Inventory,
        dry_run: bool,
    ) -> Result<Vec<Reconciliation>, Error> {
        let mut out = Vec::new();

        for (key, spec) in inventory.items() {
            if !spec.marked_to_delete() {
                continue;
            }

            let state = self
                .state_store
                .get(key)
                .await
                .map_err(Error::TransientStore)?;

            if state.resource_status.does_not_exist() {
                warn!(key = %key, "destroy requested but no prior state exists for this resource");
                continue;
            }

            let Some(prior) = &state.reconciliation else {
                warn!(key = %key, "destroy requested but stored state carries no reconciliation");
                continue;
            };

            out.push(Reconciliation {
                key: key.clone(),
                action: Action::Destroy,
                resource_hash: prior.resource_hash.clone(),
                input: prior.input.clone(),
                module_configuration: prior.module_configuration.clone(),
                linked_resources: None,
                dry_run,
            });
        }

        Ok(out)
    }

    fn resolve_module_configuration(&self, spec: &Spec) -> Result<ModuleConfiguration, Error> {
        let module = self
            .modules
            .get(&(spec.provision_provider.clone(), spec.provider.clone()))
            .cloned()
            .unwrap_or_else(|| self.default_module(spec));

        let overrides = match &spec.metadata.module_overrides {
            Some(v) => Some(serde_json::from_value::<ModuleOverrides>(v.clone()).map_err(|e| {
                Error::validation(spec.key(), format!("invalid module_overrides: {e}"))
            })?),
            None => None,
        };

        Ok(ModuleConfiguration::resolve(&module, overrides.as_ref()))
    }

    fn default_module(&self, spec: &Spec) -> Module {
        Module {
            provision_provider: spec.provision_provider.clone(),
            provider: spec.provider.clone(),
            image: self.settings.default_image.clone(),
            version: self.settings.default_version.clone(),
            outputs_secret_image: self.settings.default_outputs_secret_image.clone(),
            outputs_secret_version: self.settings.default_outputs_secret_version.clone(),
            reconcile_drift_interval_minutes: self.settings.default_drift_interval_minutes,
            reconcile_timeout_minutes: self.settings.default_timeout_minutes,
            resources: ResourceRequirements {
                cpu_request: "100m".to_string(),
                memory_request: "128Mi".to_string(),
                cpu_limit: "200m".to_string(),
                memory_limit: "256Mi".to_string(),
            },
        }
    }

    /// Queries the job reconciler using the *state's stored* reconciliation,
    /// not the freshly built `r` — the dispatched job was built from
    /// whatever reconciliation was current when it was enqueued, which may
    /// differ from a freshly recomputed one if the spec changed mid-flight.
    /// Returns whether the target Secret needs a sync pass.
    async fn update_in_progress_state(
        &self,
        r: &Reconciliation,
        state: &mut StateRecord,
    ) -> Result<bool, Error> {
        if !state.resource_status.is_in_progress() {
            return Ok(false);
        }

        let Some(stored) = state.reconciliation.clone() else {
            warn!(key = %r.key, "resource is in progress but has no stored reconciliation; marking as error");
            state.resource_status = ResourceStatus::Error;
            state.reconciliation_errors += 1;
            self.state_store
                .put(&r.key, state)
                .await
                .map_err(Error::TransientStore)?;
            return Ok(false);
        };

        info!(key = %r.key, action = ?stored.action, "reconciliation in progress");

        let mut need_secret_sync = false;
        let mut failed = false;

        match self
            .job_reconciler
            .status(&stored)
            .await
            .map_err(Error::TransientStore)?
        {
            ReconcileStatus::Success => {
                info!(key = %r.key, action = ?r.action, "reconciliation ended successfully");
                match r.action {
                    Action::Apply => {
                        state.resource_status = ResourceStatus::PendingSecretSync;
                        state.reconciliation_errors = 0;
                        self.state_store
                            .put(&r.key, state)
                            .await
                            .map_err(Error::TransientStore)?;
                        need_secret_sync = true;
                    }
                    Action::Destroy => {
                        state.resource_status = ResourceStatus::Deleted;
                        self.state_store
                            .delete(&r.key)
                            .await
                            .map_err(Error::TransientStore)?;
                    }
                }
            }
            ReconcileStatus::Error => {
                info!(key = %r.key, action = ?r.action, "reconciliation ended with an error");
                failed = true;
            }
            ReconcileStatus::NotExists => {
                warn!(key = %r.key, "reconciliation job vanished; marking as error to retrigger");
                failed = true;
            }
            ReconcileStatus::InProgress => {}
        }

        if failed {
            state.resource_status = ResourceStatus::Error;
            state.reconciliation_errors += 1;
            self.state_store
                .put(&r.key, state)
                .await
                .map_err(Error::TransientStore)?;
        }

        Ok(need_secret_sync)
    }

    async fn update_state(&self, r: &Reconciliation, state: &mut StateRecord) -> Result<(), Error> {
        state.ts = Utc::now();
        state.resource_status = match r.action {
            Action::Apply => ResourceStatus::InProgress,
            Action::Destroy => ResourceStatus::DeleteInProgress,
        };
        state.reconciliation = Some(r.clone());
        self.state_store
            .put(&r.key, state)
            .await
            .map_err(Error::TransientStore)
    }

    /// The reconcile-needed decision table (spec.md §4.4).
    fn decide(&self, r: &Reconciliation, state: &StateRecord) -> ReconcileAction {
        reconcile_action(r, state)
    }

    async fn sync_secrets(&self, inventory: &Inventory, keys: &BTreeSet<ResourceKey>) {
        let specs: Vec<Spec> = keys.iter().filter_map(|k| inventory.get(k).cloned()).collect();
        let failed = self.secrets_sync.sync_secrets(&specs).await;

        for key in keys {
            if failed.contains(key) {
                crate::metrics::increment_secret_sync_errors();
                error!(key = %key, "outputs secret could not be reconciled; leaving PENDING_SECRET_SYNC");
                continue;
            }
            crate::metrics::increment_secrets_synced();
            if let Err(e) = self
                .state_store
                .update_status(key, ResourceStatus::Created)
                .await
            {
                error!(key = %key, error = %e, "failed to mark resource CREATED after secret sync");
            }
        }
    }
}

/// The reconcile-needed decision table (spec.md §4.4), as a free function so
/// it's directly unit-testable against every row without constructing a full
/// `Manager`. `APPLY`+`CREATED` checks hash-change first, then drift, then
/// config-override — the first matching condition wins.
fn reconcile_action(r: &Reconciliation, state: &StateRecord) -> ReconcileAction {
    match (r.action, state.resource_status) {
        (Action::Apply, ResourceStatus::NotExists) => ReconcileAction::ApplyNotExists,
        (Action::Apply, ResourceStatus::Error) => ReconcileAction::ApplyError,
        (Action::Apply, ResourceStatus::Created) => match &state.reconciliation {
            None => ReconcileAction::ApplySpecChanged,
            Some(prior) if prior.resource_hash != r.resource_hash => {
                ReconcileAction::ApplySpecChanged
            }
            Some(_) => {
                let elapsed = Utc::now().signed_duration_since(state.ts);
                let drift = chrono::Duration::minutes(i64::from(
                    r.module_configuration.reconcile_drift_interval_minutes,
                ));
                if elapsed > drift {
                    ReconcileAction::ApplyDriftDetection
                } else if r.module_configuration.overridden {
                    ReconcileAction::ApplyModuleConfigOverridden
                } else {
                    ReconcileAction::Noop
                }
            }
        },
        (Action::Apply, ResourceStatus::ReconciliationRequested) => {
            ReconcileAction::ApplyUserRequested
        }
        (Action::Destroy, ResourceStatus::Created) => ReconcileAction::DestroyCreated,
        (Action::Destroy, ResourceStatus::Error) => ReconcileAction::DestroyError,
        _ => ReconcileAction::Noop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModuleConfiguration, ResourceKey};

    fn module_conf(overridden: bool) -> ModuleConfiguration {
        ModuleConfiguration {
            image: "i".to_string(),
            version: "1".to_string(),
            outputs_secret_image: "o".to_string(),
            outputs_secret_version: "1".to_string(),
            reconcile_drift_interval_minutes: 60,
            reconcile_timeout_minutes: 60,
            overridden,
        }
    }

    fn reconciliation(action: Action, hash: &str, overridden: bool) -> Reconciliation {
        Reconciliation {
            key: ResourceKey::new("aws", "acct-1", "rds", "demo-db"),
            action,
            resource_hash: hash.to_string(),
            input: "{}".to_string(),
            module_configuration: module_conf(overridden),
            linked_resources: None,
            dry_run: false,
        }
    }

    fn state(status: ResourceStatus, ts: chrono::DateTime<Utc>, prior_hash: Option<&str>) -> StateRecord {
        StateRecord {
            resource_status: status,
            ts,
            reconciliation: prior_hash.map(|h| reconciliation(Action::Apply, h, false)),
            reconciliation_errors: 0,
        }
    }

    #[test]
    fn apply_not_exists() {
        let r = reconciliation(Action::Apply, "H", false);
        let s = state(ResourceStatus::NotExists, Utc::now(), None);
        assert_eq!(reconcile_action(&r, &s), ReconcileAction::ApplyNotExists);
    }

    #[test]
    fn apply_error_always_retries() {
        let r = reconciliation(Action::Apply, "H", false);
        let s = state(ResourceStatus::Error, Utc::now(), Some("H"));
        assert_eq!(reconcile_action(&r, &s), ReconcileAction::ApplyError);
    }

    #[test]
    fn apply_spec_changed_takes_priority_over_drift() {
        let r = reconciliation(Action::Apply, "H2", false);
        let old_ts = Utc::now() - chrono::Duration::hours(100);
        let s = state(ResourceStatus::Created, old_ts, Some("H1"));
        assert_eq!(reconcile_action(&r, &s), ReconcileAction::ApplySpecChanged);
    }

    #[test]
    fn apply_drift_detection_when_hash_equal_and_interval_elapsed() {
        let r = reconciliation(Action::Apply, "H", false);
        let old_ts = Utc::now() - chrono::Duration::minutes(120);
        let s = state(ResourceStatus::Created, old_ts, Some("H"));
        assert_eq!(reconcile_action(&r, &s), ReconcileAction::ApplyDriftDetection);
    }

    #[test]
    fn apply_module_config_overridden_when_fresh_and_unchanged() {
        let r = reconciliation(Action::Apply, "H", true);
        let s = state(ResourceStatus::Created, Utc::now(), Some("H"));
        assert_eq!(
            reconcile_action(&r, &s),
            ReconcileAction::ApplyModuleConfigOverridden
        );
    }

    #[test]
    fn apply_created_fresh_unchanged_not_overridden_is_noop() {
        let r = reconciliation(Action::Apply, "H", false);
        let s = state(ResourceStatus::Created, Utc::now(), Some("H"));
        assert_eq!(reconcile_action(&r, &s), ReconcileAction::Noop);
    }

    #[test]
    fn apply_user_requested() {
        let r = reconciliation(Action::Apply, "H", false);
        let s = state(ResourceStatus::ReconciliationRequested, Utc::now(), Some("H"));
        assert_eq!(reconcile_action(&r, &s), ReconcileAction::ApplyUserRequested);
    }

    #[test]
    fn destroy_created() {
        let r = reconciliation(Action::Destroy, "H", false);
        let s = state(ResourceStatus::Created, Utc::now(), Some("H"));
        assert_eq!(reconcile_action(&r, &s), ReconcileAction::DestroyCreated);
    }

    #[test]
    fn destroy_error() {
        let r = reconciliation(Action::Destroy, "H", false);
        let s = state(ResourceStatus::Error, Utc::now(), Some("H"));
        assert_eq!(reconcile_action(&r, &s), ReconcileAction::DestroyError);
    }

    #[test]
    fn destroy_pending_secret_sync_is_noop() {
        let r = reconciliation(Action::Destroy, "H", false);
        let s = state(ResourceStatus::PendingSecretSync, Utc::now(), Some("H"));
        assert_eq!(reconcile_action(&r, &s), ReconcileAction::Noop);
    }
}
