//! `kube`-backed [`JobController`](super::JobController): dispatches Jobs
//! into the workers cluster/namespace and polls their status through the
//! Kubernetes API, the way the corpus's controllers drive `Api<T>` against
//! a live cluster.

use crate::job::manifest::JobManifest;
use crate::job::{ConcurrencyPolicy, JobController, ReconcileStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::{Api, Client};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub struct KubeJobController {
    jobs: Api<Job>,
    config_maps: Api<ConfigMap>,
    pods: Api<Pod>,
}

impl KubeJobController {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            jobs: Api::namespaced(client.clone(), namespace),
            config_maps: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
        }
    }

    async fn job_is_terminal(&self, name: &str) -> Result<Option<ReconcileStatus>> {
        match self.jobs.get(name).await {
            Ok(job) => Ok(terminal_status(&job)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(Some(ReconcileStatus::NotExists)),
            Err(e) => Err(e.into()),
        }
    }
}

fn terminal_status(job: &Job) -> Option<ReconcileStatus> {
    let status = job.status.as_ref()?;
    if status.succeeded.unwrap_or(0) > 0 {
        return Some(ReconcileStatus::Success);
    }
    if status.failed.unwrap_or(0) > 0 {
        return Some(ReconcileStatus::Error);
    }
    None
}

#[async_trait]
impl JobController for KubeJobController {
    async fn enqueue_job(&self, manifest: &JobManifest, policy: ConcurrencyPolicy) -> Result<()> {
        let name = manifest
            .job
            .metadata
            .name
            .as_deref()
            .context("job manifest is missing a name")?;

        let existing_status = self.job_is_terminal(name).await?;
        let replace = match existing_status {
            None => false,
            Some(ReconcileStatus::NotExists) => true,
            Some(ReconcileStatus::Success) | Some(ReconcileStatus::Error) => {
                policy.replace_finished || policy.replace_failed
            }
            Some(ReconcileStatus::InProgress) => policy.replace_in_progress,
        };

        if existing_status.is_some() && existing_status != Some(ReconcileStatus::NotExists) && !replace {
            debug!(job = name, "job already dispatched, concurrency policy forbids replacement");
            return Ok(());
        }

        if existing_status.is_some() && existing_status != Some(ReconcileStatus::NotExists) {
            info!(job = name, "replacing existing job per concurrency policy");
            let _ = self.jobs.delete(name, &DeleteParams::default()).await;
        }

        let cm_name = manifest
            .input_config_map
            .metadata
            .name
            .as_deref()
            .context("input config map is missing a name")?;
        match self.config_maps.get(cm_name).await {
            Ok(_) => {
                self.config_maps
                    .delete(cm_name, &DeleteParams::default())
                    .await
                    .ok();
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
        self.config_maps
            .create(&PostParams::default(), &manifest.input_config_map)
            .await
            .context("creating job input config map")?;

        self.jobs
            .create(&PostParams::default(), &manifest.job)
            .await
            .context("creating job")?;
        Ok(())
    }

    async fn get_job_status(&self, job_name: &str) -> Result<ReconcileStatus> {
        match self.job_is_terminal(job_name).await? {
            Some(status) => Ok(status),
            None => Ok(ReconcileStatus::InProgress),
        }
    }

    async fn get_success_job_duration(&self, job_name: &str) -> Result<Option<Duration>> {
        let job = match self.jobs.get(job_name).await {
            Ok(job) => job,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let status = match &job.status {
            Some(status) if status.succeeded.unwrap_or(0) > 0 => status,
            _ => return Ok(None),
        };
        let (Some(start), Some(end)) = (&status.start_time, &status.completion_time) else {
            return Ok(None);
        };
        let seconds = (end.0 - start.0).num_seconds().max(0);
        Ok(Some(Duration::from_secs(seconds as u64)))
    }

    async fn wait_for_job_list_completion(
        &self,
        job_names: &[String],
        check_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<HashMap<String, ReconcileStatus>> {
        let start = Instant::now();
        let mut results = HashMap::new();
        let mut pending: Vec<String> = job_names.to_vec();

        loop {
            let mut still_pending = Vec::new();
            for name in pending {
                match self.get_job_status(&name).await? {
                    ReconcileStatus::InProgress => still_pending.push(name),
                    status => {
                        results.insert(name, status);
                    }
                }
            }
            pending = still_pending;

            if pending.is_empty() {
                break;
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    warn!(remaining = pending.len(), "timed out waiting for jobs to complete");
                    for name in pending {
                        results.insert(name, ReconcileStatus::InProgress);
                    }
                    break;
                }
            }
            sleep(check_interval).await;
        }

        Ok(results)
    }

    async fn get_job_logs(&self, job_name: &str, out: &mut dyn std::io::Write) -> Result<()> {
        let pods = self
            .pods
            .list(&ListParams::default().labels(&format!("job-name={job_name}")))
            .await
            .context("listing job pods")?;

        for pod in &pods.items {
            let Some(pod_name) = &pod.metadata.name else { continue };
            let mut log_stream = self
                .pods
                .log_stream(
                    pod_name,
                    &LogParams {
                        follow: false,
                        ..Default::default()
                    },
                )
                .await
                .with_context(|| format!("streaming logs for pod {pod_name}"))?;

            while let Some(chunk) = log_stream.try_next().await? {
                out.write_all(&chunk)?;
            }
        }
        Ok(())
    }
}
