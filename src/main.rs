//! # External Resources Manager
//!
//! Control-loop binary: reconciles the catalog's declared external cloud
//! resources against real-world state, one pass at a time, via Kubernetes
//! Jobs, a DynamoDB-backed state store, and a Secret synchroniser.
//!
//! ## Usage
//!
//! ```bash
//! external-resources-manager reconcile --catalog-file catalog.yaml
//! external-resources-manager reconcile --catalog-file catalog.yaml --once
//! external-resources-manager dry-run --catalog-file catalog.yaml --dry-run-job-suffix mr-123
//! ```
//!
//! See the [README.md](../README.md) for deployment details.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use external_resources_manager::catalog::CatalogClient;
use external_resources_manager::catalog_file::JsonFileCatalogClient;
use external_resources_manager::config::Settings;
use external_resources_manager::factory::aws::TerraformBackend;
use external_resources_manager::factory::cloudflare::CloudflareExternalResourceFactory;
use external_resources_manager::factory::{aws::AwsExternalResourceFactory, ExternalResourceFactory, ObjectFactory};
use external_resources_manager::inventory::Inventory;
use external_resources_manager::job::k8s::KubeJobController;
use external_resources_manager::job::JobReconciler;
use external_resources_manager::secret_reader::{KubeSecretReader, SecretReader};
use external_resources_manager::secrets_sync::{KubeSecretsSynchroniser, SecretsSynchroniser};
use external_resources_manager::server::{start_server, ServerState};
use external_resources_manager::state_store::dynamodb::DynamoDbStateStore;
use external_resources_manager::state_store::StateStore;
use external_resources_manager::{Error, Manager};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "external-resources-manager")]
#[command(about = "Reconciles catalog-declared external cloud resources against real state")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the catalog document (namespaces, modules, settings) this
    /// run reconciles against.
    #[arg(long, global = true)]
    catalog_file: PathBuf,

    /// Overrides the catalog's `workers_cluster` setting.
    #[arg(long, global = true)]
    workers_cluster: Option<String>,

    /// Overrides the catalog's `workers_namespace` setting.
    #[arg(long, global = true)]
    workers_namespace: Option<String>,

    /// Overrides `ERM_THREAD_POOL_SIZE` / the default worker pool size used
    /// by dry-run dispatch.
    #[arg(long, global = true)]
    thread_pool_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Live reconciliation: dispatches jobs, advances state, syncs secrets.
    Reconcile {
        /// Run a single pass and exit instead of looping forever.
        #[arg(long)]
        once: bool,
    },
    /// Pre-merge dry run: dispatches only reconciliations whose hash
    /// differs from stored state, waits for completion, prints job logs,
    /// never writes state. Exits non-zero if anything failed.
    DryRun {
        /// Suffix appended to dry-run job names (e.g. a merge-request
        /// number), so concurrent dry runs don't collide.
        #[arg(long)]
        dry_run_job_suffix: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "external_resources_manager=info".into()),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("BUILD_GIT_HASH"),
        built_at = env!("BUILD_DATETIME"),
        "Starting external resources manager"
    );

    external_resources_manager::metrics::register_metrics()
        .context("failed to register Prometheus metrics")?;

    let cli = Cli::parse();
    let mut settings = Settings::from_env();

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });
    let server_state_clone = Arc::clone(&server_state);
    let metrics_port = settings.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, server_state_clone).await {
            error!(error = %e, "HTTP server error");
        }
    });

    let catalog = JsonFileCatalogClient::from_path(&cli.catalog_file)
        .with_context(|| format!("loading catalog document from {}", cli.catalog_file.display()))?;

    let catalog_settings = catalog.get_settings().await?;
    settings.state_table_name = catalog_settings.state_table_name;
    settings.state_account_name = catalog_settings.state_account_name;
    settings.workers_cluster = cli
        .workers_cluster
        .clone()
        .unwrap_or(catalog_settings.workers_cluster);
    settings.workers_namespace = cli
        .workers_namespace
        .clone()
        .unwrap_or(catalog_settings.workers_namespace);
    if let Some(n) = cli.thread_pool_size {
        settings.thread_pool_size = n;
    }
    if let Commands::DryRun { dry_run_job_suffix: Some(suffix) } = &cli.command {
        settings.dry_run_job_suffix = suffix.clone();
    }

    let namespaces = catalog.get_namespaces().await?;
    let modules = catalog.get_modules().await?;
    let inventory = Inventory::build(&namespaces).context("assembling inventory from catalog")?;
    info!(resources = inventory.len(), "assembled inventory");

    let kube_client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let aws_shared_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let state_store: Arc<dyn StateStore> = Arc::new(DynamoDbStateStore::new(
        aws_sdk_dynamodb::Client::new(&aws_shared_config),
        settings.state_table_name.clone(),
    ));

    let backend = TerraformBackend {
        bucket: settings.tf_state_bucket.clone(),
        region: settings.tf_state_region.clone(),
        dynamodb_table: settings.tf_state_dynamodb_table.clone(),
    };
    let secret_reader: Arc<dyn SecretReader> = Arc::new(KubeSecretReader::new(kube_client.clone()));
    let mut factories: ObjectFactory<dyn ExternalResourceFactory> = ObjectFactory::new();
    let aws_factory = Arc::new(AwsExternalResourceFactory::new(
        backend.clone(),
        settings.workers_cluster.clone(),
        secret_reader.clone(),
    ));
    factories.register("aws", aws_factory.clone());
    factories.register("default", aws_factory);
    factories.register(
        "cloudflare",
        Arc::new(CloudflareExternalResourceFactory::new(
            backend,
            settings.workers_cluster.clone(),
            secret_reader,
        )),
    );

    let job_controller = KubeJobController::new(kube_client.clone(), &settings.workers_namespace);
    let job_reconciler = JobReconciler::new(job_controller, settings.clone());
    let secrets_sync: Arc<dyn SecretsSynchroniser> = Arc::new(KubeSecretsSynchroniser::new(
        kube_client.clone(),
        settings.workers_namespace.clone(),
    ));

    let manager = Manager::new(
        state_store,
        job_reconciler,
        factories,
        modules,
        secrets_sync,
        settings.clone(),
    );

    server_state.is_ready.store(true, Ordering::Relaxed);

    match cli.command {
        Commands::Reconcile { once } => {
            if once {
                run_pass(&manager, &inventory).await;
            } else {
                loop {
                    run_pass(&manager, &inventory).await;
                    tokio::time::sleep(settings.loop_interval()).await;
                }
            }
        }
        Commands::DryRun { .. } => {
            if let Err(e) = manager.run_dry_run(&inventory).await {
                error!(error = %e, "dry run failed");
                std::process::exit(1);
            }
        }
    }

    info!("external resources manager stopped");
    Ok(())
}

/// Runs one `Manager::run_once` pass, timing it and recording the orphan
/// count, both exposed on `/metrics`. Orphaned resources and per-spec
/// validation errors abort only this pass, not the process — the next
/// loop iteration gets a fresh chance once an operator clears them.
async fn run_pass(manager: &Manager<KubeJobController>, inventory: &Inventory) {
    let start = Instant::now();
    match manager.run_once(inventory).await {
        Ok(()) => {
            external_resources_manager::metrics::set_orphaned_resources(0);
        }
        Err(Error::OrphanedResources(keys)) => {
            external_resources_manager::metrics::set_orphaned_resources(keys.len());
            error!(count = keys.len(), "orphaned resources found; skipping this pass");
        }
        Err(e) => {
            error!(error = %e, "reconcile pass failed");
        }
    }
    external_resources_manager::metrics::increment_loop_runs();
    external_resources_manager::metrics::observe_loop_duration(start.elapsed().as_secs_f64());
}
