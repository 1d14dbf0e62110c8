//! Wire types for the remote reconciliation endpoint.
//!
//! The remote side is required to treat item ids idempotently
//! (upsert-by-id), which is what makes the orchestrator's at-least-once
//! retry behavior safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EntityType, MutationAction, PendingMutation};

/// Snapshot of one mutation as submitted to the remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub action: MutationAction,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<&PendingMutation> for BatchItem {
    fn from(m: &PendingMutation) -> Self {
        Self {
            id: m.id,
            entity_type: m.entity_type,
            action: m.action,
            payload: m.payload.clone(),
            created_at: m.created_at,
        }
    }
}

/// An ephemeral grouping of mutations submitted in one remote call.
#[derive(Debug, Clone)]
pub struct SyncBatch {
    pub batch_id: Uuid,
    pub device_id: Uuid,
    pub items: Vec<BatchItem>,
}

impl SyncBatch {
    pub fn new(device_id: Uuid, mutations: &[PendingMutation]) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            device_id,
            items: mutations.iter().map(BatchItem::from).collect(),
        }
    }

    /// The request body for this batch.
    pub fn request(&self) -> SyncBatchRequest {
        SyncBatchRequest {
            device_id: self.device_id,
            items: self.items.clone(),
        }
    }
}

/// Body POSTed to the reconciliation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchRequest {
    pub device_id: Uuid,
    pub items: Vec<BatchItem>,
}

/// Per-item verdict from the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Synced,
    Failed,
    Conflict,
}

/// One item's result within a batch response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub id: Uuid,
    pub status: RemoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body returned by the reconciliation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchResponse {
    pub success: bool,
    pub results: Vec<ItemResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let device_id = Uuid::new_v4();
        let m = PendingMutation::new(
            EntityType::Appointment,
            MutationAction::Create,
            json!({"patient": "p-1"}),
            device_id,
        );
        let batch = SyncBatch::new(device_id, std::slice::from_ref(&m));

        let value = serde_json::to_value(batch.request()).unwrap();

        assert_eq!(value["deviceId"], json!(device_id.to_string()));
        let item = &value["items"][0];
        assert_eq!(item["id"], json!(m.id.to_string()));
        assert_eq!(item["entityType"], json!("appointment"));
        assert_eq!(item["action"], json!("create"));
        assert_eq!(item["payload"], json!({"patient": "p-1"}));
        assert!(item.get("createdAt").is_some());
        // Delivery-side fields never go over the wire.
        assert!(item.get("status").is_none());
        assert!(item.get("attempts").is_none());
    }

    #[test]
    fn test_response_wire_shape() {
        let id = Uuid::new_v4();
        let raw = format!(
            r#"{{"success": true, "results": [
                {{"id": "{}", "status": "failed", "error": "missing field"}}
            ]}}"#,
            id
        );

        let response: SyncBatchResponse = serde_json::from_str(&raw).unwrap();
        assert!(response.success);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, id);
        assert_eq!(response.results[0].status, RemoteStatus::Failed);
        assert_eq!(response.results[0].error.as_deref(), Some("missing field"));
    }

    #[test]
    fn test_result_error_field_optional() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"id": "{}", "status": "synced"}}"#, id);
        let result: ItemResult = serde_json::from_str(&raw).unwrap();
        assert_eq!(result.status, RemoteStatus::Synced);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_batches_have_distinct_ids() {
        let device_id = Uuid::new_v4();
        let a = SyncBatch::new(device_id, &[]);
        let b = SyncBatch::new(device_id, &[]);
        assert_ne!(a.batch_id, b.batch_id);
    }
}
