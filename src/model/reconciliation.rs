//! `Reconciliation` — the unit of work dispatched to the job reconciler,
//! and the decision-table vocabulary that decides when one is needed.

use crate::model::key::ResourceKey;
use crate::model::module::ModuleConfiguration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Apply,
    Destroy,
}

/// An immutable, equality-by-content description of one resource's desired
/// treatment this loop invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub key: ResourceKey,
    pub action: Action,
    pub resource_hash: String,
    pub input: String,
    pub module_configuration: ModuleConfiguration,
    /// Dependent resources (e.g. RDS read replicas of this identifier).
    /// Populated for APPLY reconciliations, for observability only; the
    /// manager does not use it to trigger dependent reconciliation (see
    /// design notes — partial propagation was explicitly rejected rather
    /// than half-built). DESTROY reconciliations leave this `None`: they
    /// reuse historical state rather than re-resolving the spec.
    #[serde(default)]
    pub linked_resources: Option<BTreeSet<ResourceKey>>,
    /// Whether this reconciliation is part of a dry run — affects job
    /// naming and whether state is written after completion.
    #[serde(default)]
    pub dry_run: bool,
}

/// Why the decision engine chose to (or chose not to) dispatch a job this
/// loop invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Noop,
    ApplyNotExists,
    ApplyError,
    ApplySpecChanged,
    ApplyDriftDetection,
    ApplyUserRequested,
    ApplyModuleConfigOverridden,
    DestroyCreated,
    DestroyError,
}

impl ReconcileAction {
    pub fn needs_dispatch(self) -> bool {
        !matches!(self, ReconcileAction::Noop)
    }

    pub fn reason(self) -> &'static str {
        match self {
            ReconcileAction::Noop => "no reconciliation needed",
            ReconcileAction::ApplyNotExists => "resource does not exist yet",
            ReconcileAction::ApplyError => "previous reconciliation ended in error",
            ReconcileAction::ApplySpecChanged => "resolved resource content changed",
            ReconcileAction::ApplyDriftDetection => "drift interval elapsed",
            ReconcileAction::ApplyUserRequested => "user requested reconciliation",
            ReconcileAction::ApplyModuleConfigOverridden => "module configuration overridden",
            ReconcileAction::DestroyCreated => "resource marked for deletion",
            ReconcileAction::DestroyError => "previous deletion ended in error",
        }
    }
}
