use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::action::MutationAction;
use super::entity_type::EntityType;
use super::status::MutationStatus;

/// One user-initiated create/update/delete captured for later delivery.
///
/// `payload`, `action`, and `entity_type` are fixed at creation; only the
/// delivery fields (`status`, `error_message`, `synced_at`, `attempts`,
/// `next_attempt_at`) change afterwards, and only through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub action: MutationAction,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub status: MutationStatus,
    pub error_message: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    pub device_id: Uuid,
    /// Number of times this record has entered a dispatched batch.
    pub attempts: u32,
    /// Earliest instant the next attempt may run, set by the backoff policy.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl PendingMutation {
    pub fn new(
        entity_type: EntityType,
        action: MutationAction,
        payload: serde_json::Value,
        device_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type,
            action,
            payload,
            created_at: Utc::now(),
            status: MutationStatus::Pending,
            error_message: None,
            synced_at: None,
            device_id,
            attempts: 0,
            next_attempt_at: None,
        }
    }
}

impl fmt::Display for PendingMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entity = self.entity_type.to_string();
        let action = self.action.to_string();
        let status = self.status.to_string();
        write!(
            f,
            "{}  {:<15}  {:<6}  {:<8}  {}",
            self.id,
            entity,
            action,
            status,
            self.created_at.to_rfc3339()
        )?;
        if let Some(err) = &self.error_message {
            write!(f, "\n    error: {}", err)?;
        }
        Ok(())
    }
}

/// Aggregate per-status totals, used to bootstrap foreground views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub syncing: u64,
    pub synced: u64,
    pub failed: u64,
    pub conflict: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.syncing + self.synced + self.failed + self.conflict
    }

    /// Records still awaiting a successful delivery.
    pub fn unsynced(&self) -> u64 {
        self.pending + self.syncing + self.failed
    }
}
