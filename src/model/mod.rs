//! Core value types shared by every other module: resource identity,
//! catalog specs, resolved resources, module configuration, reconciliation
//! units, and durable state records.

pub mod key;
pub mod module;
pub mod reconciliation;
pub mod resource;
pub mod spec;
pub mod state;

pub use key::ResourceKey;
pub use module::{Module, ModuleConfiguration, ModuleOverrides, ResourceRequirements};
pub use reconciliation::{Action, ReconcileAction, Reconciliation};
pub use resource::{ExternalResourceProvision, ModuleProvisionData, Resource};
pub use spec::{Metadata, Namespace, NamespaceRef, NamespaceSelector, Provisioner, RawResource, Spec};
pub use state::{ResourceStatus, StateRecord};
