mod agent_cmd;
mod config_cmd;
mod queue_cmd;
mod sync_cmd;

pub use agent_cmd::AgentRunCommand;
pub use config_cmd::{ConfigCommand, DeviceCommand};
pub use queue_cmd::{ClearCommand, PendingCommand, ResubmitCommand};
pub use sync_cmd::{StatusCommand, SyncCommand};

use crate::agent::AgentError;
use crate::db::StoreError;
use crate::sync::ClientError;

/// Errors from CLI commands
#[derive(Debug)]
pub enum CommandError {
    Db(sqlx::Error),
    Store(StoreError),
    Client(ClientError),
    Agent(AgentError),
    Io(std::io::Error),
    Usage(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Db(e) => write!(f, "Database error: {}", e),
            CommandError::Store(e) => write!(f, "{}", e),
            CommandError::Client(e) => write!(f, "{}", e),
            CommandError::Agent(e) => write!(f, "{}", e),
            CommandError::Io(e) => write!(f, "I/O error: {}", e),
            CommandError::Usage(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Db(e) => Some(e),
            CommandError::Store(e) => Some(e),
            CommandError::Client(e) => Some(e),
            CommandError::Agent(e) => Some(e),
            CommandError::Io(e) => Some(e),
            CommandError::Usage(_) => None,
        }
    }
}

impl From<sqlx::Error> for CommandError {
    fn from(e: sqlx::Error) -> Self {
        CommandError::Db(e)
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::Store(e)
    }
}

impl From<ClientError> for CommandError {
    fn from(e: ClientError) -> Self {
        CommandError::Client(e)
    }
}

impl From<AgentError> for CommandError {
    fn from(e: AgentError) -> Self {
        CommandError::Agent(e)
    }
}

impl From<std::io::Error> for CommandError {
    fn from(e: std::io::Error) -> Self {
        CommandError::Io(e)
    }
}
