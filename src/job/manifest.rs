//! Job manifest builder (spec.md §4.5, §6.5): the Kubernetes Job shape
//! the module-image ecosystem depends on. Every field here is load-bearing
//! — the module image expects exactly this layout of env vars and mounts.

use crate::config::Settings;
use crate::model::{Action, Reconciliation};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    ObjectFieldSelector, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

const WORKDIR_VOLUME: &str = "workdir";
const INPUT_VOLUME: &str = "input-scripts";
const CREDENTIALS_VOLUME: &str = "credentials";
const WORKDIR_MOUNT_PATH: &str = "/workdir";
const INPUT_MOUNT_PATH: &str = "/input";
const CREDENTIALS_MOUNT_PATH: &str = "/credentials";

/// A Job and the ConfigMap its `input-scripts` volume mounts — dispatched
/// together so the module container always finds `input.json` in place.
pub struct JobManifest {
    pub job: Job,
    pub input_config_map: ConfigMap,
}

fn annotations(reconciliation: &Reconciliation) -> BTreeMap<String, String> {
    let key = &reconciliation.key;
    BTreeMap::from([
        ("external-resources/provision-provider".to_string(), key.provision_provider.clone()),
        ("external-resources/provisioner-name".to_string(), key.provisioner_name.clone()),
        ("external-resources/provider".to_string(), key.provider.clone()),
        ("external-resources/identifier".to_string(), key.identifier.clone()),
    ])
}

fn labels(reconciliation: &Reconciliation) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/managed-by".to_string(), "external-resources-manager".to_string()),
        ("external-resources/action".to_string(), match reconciliation.action {
            Action::Apply => "apply".to_string(),
            Action::Destroy => "destroy".to_string(),
        }),
    ])
}

pub fn build_job_manifest(
    reconciliation: &Reconciliation,
    job_name: &str,
    settings: &Settings,
) -> JobManifest {
    let input_config_map_name = format!("{job_name}-input");
    let input_config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(input_config_map_name.clone()),
            namespace: Some(settings.workers_namespace.clone()),
            labels: Some(labels(reconciliation)),
            annotations: Some(annotations(reconciliation)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "input.json".to_string(),
            reconciliation.input.clone(),
        )])),
        ..Default::default()
    };

    let credentials_secret_name = format!("credentials-{}", reconciliation.key.provisioner_name);

    let action_str = match reconciliation.action {
        Action::Apply => "APPLY",
        Action::Destroy => "DESTROY",
    };

    let shared_mounts = vec![
        VolumeMount {
            name: WORKDIR_VOLUME.to_string(),
            mount_path: WORKDIR_MOUNT_PATH.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: INPUT_VOLUME.to_string(),
            mount_path: INPUT_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: CREDENTIALS_VOLUME.to_string(),
            mount_path: CREDENTIALS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
    ];

    let job_container = Container {
        name: "job".to_string(),
        image: Some(reconciliation.module_configuration.image_version()),
        env: Some(vec![
            EnvVar {
                name: "DRY_RUN".to_string(),
                value: Some(reconciliation.dry_run.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "ACTION".to_string(),
                value: Some(action_str.to_string()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(shared_mounts.clone()),
        ..Default::default()
    };

    let outputs_container = Container {
        name: "outputs".to_string(),
        image: Some(reconciliation.module_configuration.outputs_secret_image_version()),
        env: Some(vec![EnvVar {
            name: "NAMESPACE".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(shared_mounts),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        init_containers: Some(vec![job_container]),
        containers: vec![outputs_container],
        restart_policy: Some("Never".to_string()),
        service_account_name: Some(settings.service_account.clone()),
        image_pull_secrets: Some(vec![k8s_openapi::api::core::v1::LocalObjectReference {
            name: settings.image_pull_secret.clone(),
        }]),
        volumes: Some(vec![
            Volume {
                name: WORKDIR_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
            Volume {
                name: INPUT_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: input_config_map_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: CREDENTIALS_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(credentials_secret_name),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let active_deadline_seconds =
        i64::from(reconciliation.module_configuration.reconcile_timeout_minutes) * 60;

    let job = Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            namespace: Some(settings.workers_namespace.clone()),
            labels: Some(labels(reconciliation)),
            annotations: Some(annotations(reconciliation)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            active_deadline_seconds: Some(active_deadline_seconds),
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(3600),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(reconciliation)),
                    annotations: Some(annotations(reconciliation)),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        status: None,
    };

    JobManifest { job, input_config_map }
}
