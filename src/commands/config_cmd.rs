//! Configuration and device identity commands.

use clap::Args;

use crate::config::Config;
use crate::db::{init_db, DeviceStore};

use super::CommandError;

/// Show effective configuration
#[derive(Debug, Args)]
pub struct ConfigCommand {}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        println!("Configuration");
        println!("=============");
        println!();
        println!(
            "  remote_url:          {}",
            config.remote_url.as_deref().unwrap_or("(not set)")
        );
        println!(
            "  api_key:             {}",
            if config.api_key.is_some() {
                "(set)"
            } else {
                "(not set)"
            }
        );
        println!("  data_dir:            {}", config.data_dir.display());
        println!("  database_path:       {}", config.database_path().display());
        println!("  live_timeout_secs:   {}", config.live_timeout_secs);
        println!("  batch_timeout_secs:  {}", config.batch_timeout_secs);
        println!(
            "  batch_size:          {}",
            if config.batch_size == 0 {
                "unbounded".to_string()
            } else {
                config.batch_size.to_string()
            }
        );
        println!("  sync_interval_secs:  {}", config.sync_interval_secs);
        println!("  probe_interval_secs: {}", config.probe_interval_secs);
        println!("  backoff_base_secs:   {}", config.backoff_base_secs);
        println!("  backoff_cap_secs:    {}", config.backoff_cap_secs);
        println!("  max_attempts:        {}", config.max_attempts);
        Ok(())
    }
}

/// Print the device identity, creating it if absent
#[derive(Debug, Args)]
pub struct DeviceCommand {}

impl DeviceCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let pool = init_db(config.database_path()).await?;
        let device_id = DeviceStore::new(pool).get_or_create().await?;
        println!("{}", device_id);
        Ok(())
    }
}
