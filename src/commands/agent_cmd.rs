//! Long-running agent command.

use clap::Args;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::agent::BackgroundAgent;
use crate::config::Config;
use crate::db::init_db;

use super::CommandError;

/// Run the background sync agent until interrupted
#[derive(Debug, Args)]
pub struct AgentRunCommand {}

impl AgentRunCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "wardsync=info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();

        let pool = init_db(config.database_path()).await?;
        let (agent, handle, _router) = BackgroundAgent::new(config, pool).await?;
        let running = tokio::spawn(agent.run());

        tokio::signal::ctrl_c().await?;
        tracing::info!("shutting down");

        let _ = handle.shutdown().await;
        let _ = running.await;
        Ok(())
    }
}
