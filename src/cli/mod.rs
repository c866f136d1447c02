//! # ermctl
//!
//! Operator CLI for inspecting and nudging the external resources manager's
//! durable state directly — there is no CRD here for an operator to patch
//! the way `msmctl` patches a `SecretManagerConfig` annotation, so `ermctl`
//! talks to the same DynamoDB-backed state store the manager itself reads
//! and writes.
//!
//! ## Usage
//!
//! ```bash
//! ermctl status --key aws/acct-1/rds/demo-db
//! ermctl list --status ERROR
//! ermctl request-reconcile --key aws/acct-1/rds/demo-db
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use external_resources_manager::config::Settings;
use external_resources_manager::model::{ResourceKey, ResourceStatus};
use external_resources_manager::state_store::dynamodb::DynamoDbStateStore;
use external_resources_manager::state_store::StateStore;

#[derive(Parser)]
#[command(name = "ermctl")]
#[command(about = "Inspect and nudge the external resources manager's state store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides `ERM_STATE_TABLE_NAME`.
    #[arg(long, global = true)]
    state_table_name: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stored state record for one resource key.
    Status {
        /// `<provision_provider>/<provisioner_name>/<provider>/<identifier>`
        #[arg(long)]
        key: String,
    },
    /// List state records, optionally filtered by status.
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Sets a resource's status to RECONCILIATION_REQUESTED, which makes
    /// the next control-loop pass dispatch an APPLY regardless of hash or
    /// drift interval.
    RequestReconcile {
        #[arg(long)]
        key: String,
    },
}

fn parse_key(raw: &str) -> Result<ResourceKey> {
    let parts: Vec<&str> = raw.split('/').collect();
    let [provision_provider, provisioner_name, provider, identifier] = parts[..] else {
        bail!("key must be '<provision_provider>/<provisioner_name>/<provider>/<identifier>', got {raw:?}");
    };
    Ok(ResourceKey::new(provision_provider, provisioner_name, provider, identifier))
}

fn parse_status(raw: &str) -> Result<ResourceStatus> {
    let normalized = raw.trim().to_uppercase().replace('-', "_");
    serde_json::from_value(serde_json::Value::String(normalized))
        .with_context(|| format!("unknown status {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "ermctl=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();
    let table_name = cli.state_table_name.unwrap_or(settings.state_table_name);

    let aws_shared_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = DynamoDbStateStore::new(aws_sdk_dynamodb::Client::new(&aws_shared_config), table_name);

    match cli.command {
        Commands::Status { key } => status_command(&store, &key).await,
        Commands::List { status } => list_command(&store, status.as_deref()).await,
        Commands::RequestReconcile { key } => request_reconcile_command(&store, &key).await,
    }
}

async fn status_command(store: &DynamoDbStateStore, key: &str) -> Result<()> {
    let key = parse_key(key)?;
    let record = store.get(&key).await?;

    println!("key:                   {}", key.state_path());
    println!("status:                {:?}", record.resource_status);
    println!("last updated:          {}", record.ts);
    println!("reconciliation errors: {}", record.reconciliation_errors);
    match &record.reconciliation {
        Some(r) => println!("resource hash:         {}", r.resource_hash),
        None => println!("resource hash:         (none)"),
    }
    Ok(())
}

async fn list_command(store: &DynamoDbStateStore, status: Option<&str>) -> Result<()> {
    let records = store.scan_partial().await?;
    let filter = status.map(parse_status).transpose()?;

    println!("{:<55} {:<25} {}", "KEY", "STATUS", "HASH");
    for record in records {
        if filter.is_some_and(|f| f != record.status) {
            continue;
        }
        println!(
            "{:<55} {:<25} {}",
            record.key.state_path(),
            format!("{:?}", record.status),
            record.resource_hash.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn request_reconcile_command(store: &DynamoDbStateStore, key: &str) -> Result<()> {
    let key = parse_key(key)?;
    store
        .update_status(&key, ResourceStatus::ReconciliationRequested)
        .await
        .with_context(|| format!("requesting reconciliation for {key}"))?;
    println!("reconciliation requested for {}", key.state_path());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_rejects_wrong_segment_count() {
        assert!(parse_key("aws/acct-1/rds").is_err());
        assert!(parse_key("aws/acct-1/rds/demo-db/extra").is_err());
    }

    #[test]
    fn parse_key_accepts_four_segments() {
        let key = parse_key("aws/acct-1/rds/demo-db").unwrap();
        assert_eq!(key.identifier, "demo-db");
        assert_eq!(key.provisioner_name, "acct-1");
    }

    #[test]
    fn parse_status_is_case_and_hyphen_insensitive() {
        assert_eq!(parse_status("error").unwrap(), ResourceStatus::Error);
        assert_eq!(
            parse_status("reconciliation-requested").unwrap(),
            ResourceStatus::ReconciliationRequested
        );
    }

    #[test]
    fn parse_status_rejects_unknown_value() {
        assert!(parse_status("not-a-status").is_err());
    }
}
