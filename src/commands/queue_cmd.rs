//! Inspection and maintenance of the durable mutation store.

use clap::Args;
use futures::StreamExt;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{init_db, MutationStore};
use crate::models::MutationStatus;

use super::CommandError;

/// List stored mutations
#[derive(Debug, Args)]
pub struct PendingCommand {
    /// Only show records with this status
    #[arg(long)]
    pub status: Option<MutationStatus>,
}

impl PendingCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let pool = init_db(config.database_path()).await?;
        let store = MutationStore::new(pool);

        let mut shown = 0usize;
        {
            let mut records = std::pin::pin!(store.stream_all());
            while let Some(record) = records.next().await {
                let record = record?;
                if let Some(filter) = self.status {
                    if record.status != filter {
                        continue;
                    }
                }
                println!("{}", record);
                shown += 1;
            }
        }

        println!();
        match self.status {
            Some(status) => println!("{} record(s) with status {}", shown, status),
            None => println!("{} record(s)", shown),
        }
        Ok(())
    }
}

/// Remove stored mutations
#[derive(Debug, Args)]
pub struct ClearCommand {
    /// Remove only records that synced successfully
    #[arg(long)]
    pub synced: bool,

    /// Remove every record, including undelivered ones
    #[arg(long)]
    pub all: bool,
}

impl ClearCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let filter = match (self.synced, self.all) {
            (true, false) => Some(MutationStatus::Synced),
            (false, true) => None,
            _ => {
                return Err(CommandError::Usage(
                    "Specify exactly one of --synced or --all".to_string(),
                ))
            }
        };

        let pool = init_db(config.database_path()).await?;
        let store = MutationStore::new(pool);

        let removed = store.clear(filter).await?;
        println!("Removed {} record(s)", removed);
        Ok(())
    }
}

/// Reset a failed mutation for another delivery round
#[derive(Debug, Args)]
pub struct ResubmitCommand {
    /// Id of the failed record
    pub id: Uuid,
}

impl ResubmitCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let pool = init_db(config.database_path()).await?;
        let store = MutationStore::new(pool);

        store.resubmit(self.id).await?;
        println!("Requeued {} for delivery", self.id);
        Ok(())
    }
}
