//! Reference reconciliation endpoint.
//!
//! Implements the contract the orchestrator relies on: per-item results
//! and upsert-by-id idempotency. A mutation id that was already applied
//! returns its recorded result without re-applying any effect, so
//! at-least-once submission from clients is safe.
//!
//! Entities live in memory keyed by `(entity type, entity id)`; the
//! entity id comes from the payload's `id` field, falling back to the
//! mutation id. An update or delete carrying a `baseVersion` older than
//! the stored version is reported as a conflict for manual resolution.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{EntityType, MutationAction};
use crate::sync::protocol::{BatchItem, ItemResult, RemoteStatus, SyncBatchRequest, SyncBatchResponse};

/// One reconciled entity.
#[derive(Debug, Clone)]
pub struct StoredEntity {
    pub version: u64,
    pub payload: Value,
    pub deleted: bool,
}

#[derive(Default)]
struct Inner {
    entities: HashMap<(EntityType, String), StoredEntity>,
    /// Idempotency log: mutation id -> recorded result.
    applied: HashMap<Uuid, ItemResult>,
}

/// Shared state of the reconciliation service.
#[derive(Default)]
pub struct ReconcileState {
    inner: RwLock<Inner>,
}

impl ReconcileState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a batch in item order and returns per-item results.
    pub async fn apply_batch(&self, request: &SyncBatchRequest) -> SyncBatchResponse {
        let mut inner = self.inner.write().await;

        let results = request
            .items
            .iter()
            .map(|item| Self::apply_item(&mut inner, item))
            .collect();

        SyncBatchResponse {
            success: true,
            results,
        }
    }

    /// Number of live (non-deleted) entities of a type.
    pub async fn live_entities(&self, entity_type: EntityType) -> usize {
        let inner = self.inner.read().await;
        inner
            .entities
            .iter()
            .filter(|((t, _), e)| *t == entity_type && !e.deleted)
            .count()
    }

    /// Looks up a reconciled entity.
    pub async fn entity(&self, entity_type: EntityType, entity_id: &str) -> Option<StoredEntity> {
        let inner = self.inner.read().await;
        inner
            .entities
            .get(&(entity_type, entity_id.to_string()))
            .cloned()
    }

    fn apply_item(inner: &mut Inner, item: &BatchItem) -> ItemResult {
        // Replay of an already-applied mutation: return the recorded
        // result, apply nothing.
        if let Some(previous) = inner.applied.get(&item.id) {
            return previous.clone();
        }

        let result = Self::evaluate(inner, item);
        inner.applied.insert(item.id, result.clone());
        result
    }

    fn evaluate(inner: &mut Inner, item: &BatchItem) -> ItemResult {
        let Some(payload) = item.payload.as_object() else {
            return Self::failed(item.id, "payload must be a JSON object");
        };

        let entity_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| item.id.to_string());
        let key = (item.entity_type, entity_id);

        let existing = inner.entities.get(&key);

        if let Some(base_version) = payload.get("baseVersion").and_then(|v| v.as_u64()) {
            if let Some(entity) = existing {
                if base_version < entity.version {
                    return ItemResult {
                        id: item.id,
                        status: RemoteStatus::Conflict,
                        error: Some(format!(
                            "baseVersion {} is behind stored version {}",
                            base_version, entity.version
                        )),
                    };
                }
            }
        }

        match item.action {
            MutationAction::Create | MutationAction::Update => {
                let version = existing.map_or(1, |e| e.version + 1);
                inner.entities.insert(
                    key,
                    StoredEntity {
                        version,
                        payload: item.payload.clone(),
                        deleted: false,
                    },
                );
            }
            MutationAction::Delete => {
                let Some(entity) = inner.entities.get_mut(&key) else {
                    return Self::failed(item.id, "unknown entity");
                };
                entity.version += 1;
                entity.deleted = true;
            }
        }

        ItemResult {
            id: item.id,
            status: RemoteStatus::Synced,
            error: None,
        }
    }

    fn failed(id: Uuid, reason: &str) -> ItemResult {
        ItemResult {
            id,
            status: RemoteStatus::Failed,
            error: Some(reason.to_string()),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn sync_batch(
    State(state): State<Arc<ReconcileState>>,
    Json(request): Json<SyncBatchRequest>,
) -> Json<SyncBatchResponse> {
    tracing::debug!(
        "batch from device {} with {} item(s)",
        request.device_id,
        request.items.len()
    );
    Json(state.apply_batch(&request).await)
}

/// Builds the reconciliation router over shared state.
pub fn router(state: Arc<ReconcileState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync/batch", post(sync_batch))
        .with_state(state)
}
