//! One-shot sync and status commands.

use std::sync::Arc;

use clap::Args;

use crate::broadcast::StatusBroadcaster;
use crate::config::Config;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{init_db, DeviceStore, MutationStore};
use crate::sync::{DrainOutcome, ReconcileClient, SyncOrchestrator};

use super::CommandError;

/// Force one drain of the pending queue
#[derive(Debug, Args)]
pub struct SyncCommand {}

impl SyncCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let client = ReconcileClient::from_config(config)?;

        let pool = init_db(config.database_path()).await?;
        let store = MutationStore::new(pool.clone());
        let device_id = DeviceStore::new(pool).get_or_create().await?;

        println!("Syncing with {}...", client.base_url());
        println!();

        let reachable = client.check_server().await;
        let monitor = Arc::new(ConnectivityMonitor::new(reachable));
        let broadcaster = StatusBroadcaster::new();
        let orchestrator =
            SyncOrchestrator::new(store, client, monitor, broadcaster, device_id, config);

        match orchestrator.drain().await? {
            DrainOutcome::Completed(report) => {
                if report.total == 0 {
                    println!("Already up to date.");
                } else {
                    println!(
                        "  ✓ {} synced, {} failed, {} dispatched",
                        report.succeeded, report.failed, report.total
                    );
                }
            }
            DrainOutcome::Interrupted(report) => {
                println!(
                    "  ✗ connectivity lost mid-sync; {} synced before the drop",
                    report.succeeded
                );
            }
            DrainOutcome::Unreachable => {
                println!("  ✗ server unreachable; queued records kept for later");
            }
            DrainOutcome::AlreadyRunning => {
                println!("  ✗ another sync is already running");
            }
        }

        Ok(())
    }
}

/// Show aggregate status and server reachability
#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let pool = init_db(config.database_path()).await?;
        let store = MutationStore::new(pool);
        let counts = store.counts().await?;

        println!("Mutation Store");
        println!("==============");
        println!();
        println!("  pending:   {}", counts.pending);
        println!("  syncing:   {}", counts.syncing);
        println!("  synced:    {}", counts.synced);
        println!("  failed:    {}", counts.failed);
        println!("  conflict:  {}", counts.conflict);
        println!("  total:     {}", counts.total());
        println!();

        if !config.is_configured() {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  remote_url: \"http://sync.example.org:8080\"");
            println!("  api_key: \"your-api-key\"");
            println!();
            println!("Or set environment variables:");
            println!("  WARDSYNC_REMOTE_URL");
            println!("  WARDSYNC_API_KEY");
            return Ok(());
        }

        let client = ReconcileClient::from_config(config)?;
        print!("Server status: ");
        if client.check_server().await {
            println!("✓ connected");
        } else {
            println!("✗ unreachable");
        }

        Ok(())
    }
}
