use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wardsync::commands::{
    AgentRunCommand, ClearCommand, ConfigCommand, DeviceCommand, PendingCommand, ResubmitCommand,
    StatusCommand, SyncCommand,
};
use wardsync::config::Config;

#[derive(Parser)]
#[command(name = "wardsync")]
#[command(version)]
#[command(about = "Offline-first sync agent for hospital-operations clients", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background sync agent
    Agent(AgentRunCommand),

    /// Force one drain of the pending queue
    Sync(SyncCommand),

    /// List stored mutations
    Pending(PendingCommand),

    /// Show aggregate status and server reachability
    Status(StatusCommand),

    /// Remove stored mutations
    Clear(ClearCommand),

    /// Reset a failed mutation for another delivery round
    Resubmit(ResubmitCommand),

    /// Print the device identity
    Device(DeviceCommand),

    /// Show effective configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(cli.config)?;

    match cli.command {
        Commands::Agent(cmd) => cmd.run(&config).await?,
        Commands::Sync(cmd) => cmd.run(&config).await?,
        Commands::Pending(cmd) => cmd.run(&config).await?,
        Commands::Status(cmd) => cmd.run(&config).await?,
        Commands::Clear(cmd) => cmd.run(&config).await?,
        Commands::Resubmit(cmd) => cmd.run(&config).await?,
        Commands::Device(cmd) => cmd.run(&config).await?,
        Commands::Config(cmd) => cmd.run(&config)?,
    }

    Ok(())
}
