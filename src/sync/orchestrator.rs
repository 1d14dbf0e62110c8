//! The drain loop: flushes eligible mutations to the remote endpoint.
//!
//! A drain is invoked by any background trigger (reconnection edge,
//! periodic timer, explicit command, deferred wake). An in-process guard
//! keeps at most one drain running per device; triggers arriving while a
//! drain is in flight are coalesced, since the next scheduled run picks
//! up anything newly appended.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::broadcast::{StatusBroadcaster, SyncEvent};
use crate::config::Config;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{MutationStore, StoreError};
use crate::models::{EntityType, MutationStatus, PendingMutation};

use super::client::ReconcileClient;
use super::protocol::{RemoteStatus, SyncBatch, SyncBatchResponse};

/// Retry schedule for records that did not reach `synced`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base: Duration::from_secs(config.backoff_base_secs),
            cap: Duration::from_secs(config.backoff_cap_secs),
            max_attempts: config.max_attempts,
        }
    }

    /// Earliest instant attempt `prior_attempts + 1` may run, with
    /// exponential growth capped at `cap` plus uniform jitter.
    pub fn next_attempt_at(&self, prior_attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let base = self.base.as_secs();
        let exp = prior_attempts.min(16);
        let delay = base.saturating_mul(1u64 << exp).min(self.cap.as_secs());
        let jitter = if base == 0 {
            0
        } else {
            rand::rng().random_range(0..=base)
        };
        now + chrono::Duration::seconds((delay + jitter) as i64)
    }
}

/// Counts for the items a drain dispatched.
///
/// Items returned to `pending` after a batch transport failure count
/// toward `total` but toward neither `succeeded` nor `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

/// How a drain invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Ran through every batch.
    Completed(DrainReport),
    /// Connectivity dropped mid-run; undispatched batches were left
    /// untouched for the next trigger.
    Interrupted(DrainReport),
    /// The pre-check found the server unreachable; nothing was dispatched.
    Unreachable,
    /// Another drain holds the guard; this trigger was coalesced.
    AlreadyRunning,
}

/// Drives the mutation store through the delivery state machine.
pub struct SyncOrchestrator {
    store: MutationStore,
    client: ReconcileClient,
    monitor: Arc<ConnectivityMonitor>,
    broadcaster: StatusBroadcaster,
    device_id: Uuid,
    batch_size: usize,
    backoff: BackoffPolicy,
    drain_guard: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        store: MutationStore,
        client: ReconcileClient,
        monitor: Arc<ConnectivityMonitor>,
        broadcaster: StatusBroadcaster,
        device_id: Uuid,
        config: &Config,
    ) -> Self {
        Self {
            store,
            client,
            monitor,
            broadcaster,
            device_id,
            batch_size: config.batch_size,
            backoff: BackoffPolicy::from_config(config),
            drain_guard: Mutex::new(()),
        }
    }

    /// Runs one drain; see the module docs for the trigger model.
    pub async fn drain(&self) -> Result<DrainOutcome, StoreError> {
        let Ok(_guard) = self.drain_guard.try_lock() else {
            tracing::debug!("drain already in flight, trigger coalesced");
            return Ok(DrainOutcome::AlreadyRunning);
        };

        if !self.monitor.is_reachable() {
            self.broadcaster.notify(SyncEvent::SyncFailed {
                reason: "server unreachable".to_string(),
            });
            return Ok(DrainOutcome::Unreachable);
        }

        let eligible = self.eligible().await?;
        if eligible.is_empty() {
            tracing::debug!("drain: nothing eligible");
            return Ok(DrainOutcome::Completed(DrainReport::default()));
        }

        tracing::info!("drain: {} eligible mutation(s)", eligible.len());
        self.broadcaster.notify(SyncEvent::SyncStarted);

        let chunk_size = if self.batch_size == 0 {
            eligible.len()
        } else {
            self.batch_size
        };

        let mut report = DrainReport::default();
        let mut interrupted = false;

        for chunk in eligible.chunks(chunk_size) {
            // The only cancellation point: once a batch is dispatched the
            // remote side may already be processing it, so we never cancel
            // mid-batch. Undispatched chunks stay pending for the next run.
            if !self.monitor.is_reachable() {
                interrupted = true;
                break;
            }

            let dispatched = self.mark_chunk_syncing(chunk).await;
            if dispatched.is_empty() {
                continue;
            }
            report.total += dispatched.len();

            let batch = SyncBatch::new(self.device_id, &dispatched);
            tracing::debug!(
                "submitting batch {} with {} item(s)",
                batch.batch_id,
                batch.items.len()
            );

            match self.client.submit_batch(&batch.request()).await {
                Ok(response) => {
                    self.apply_results(&dispatched, response, &mut report).await;
                }
                Err(e) => {
                    // A whole-batch transport failure is not user-visible
                    // noise; members go back to pending for the next
                    // trigger. Other batches in this drain still run.
                    tracing::warn!("batch {} got no response: {}", batch.batch_id, e);
                    self.return_batch_to_pending(&dispatched, &mut report).await;
                }
            }
        }

        if interrupted {
            tracing::warn!("drain interrupted: connectivity lost mid-run");
            self.broadcaster.notify(SyncEvent::SyncFailed {
                reason: "connectivity lost mid-drain".to_string(),
            });
            return Ok(DrainOutcome::Interrupted(report));
        }

        tracing::info!(
            "drain complete: {} synced, {} failed, {} dispatched",
            report.succeeded,
            report.failed,
            report.total
        );
        self.broadcaster.notify(SyncEvent::SyncComplete {
            succeeded: report.succeeded,
            failed: report.failed,
            total: report.total,
        });
        Ok(DrainOutcome::Completed(report))
    }

    /// Selects pending and retryable failed records in creation order.
    ///
    /// A record still inside its backoff window holds back every later
    /// record of the same entity type, so same-entity mutations are always
    /// submitted in creation order. Records that exhausted their attempt
    /// limit are parked until an explicit resubmit and block nothing.
    async fn eligible(&self) -> Result<Vec<PendingMutation>, StoreError> {
        let candidates = self
            .store
            .list_by_statuses(&[MutationStatus::Pending, MutationStatus::Failed])
            .await?;

        let now = Utc::now();
        let mut blocked: HashSet<EntityType> = HashSet::new();
        let mut eligible = Vec::new();

        for m in candidates {
            if blocked.contains(&m.entity_type) {
                continue;
            }
            if m.attempts >= self.backoff.max_attempts {
                continue;
            }
            let due = m.next_attempt_at.map_or(true, |t| t <= now);
            if due {
                eligible.push(m);
            } else {
                blocked.insert(m.entity_type);
            }
        }

        Ok(eligible)
    }

    async fn mark_chunk_syncing(&self, chunk: &[PendingMutation]) -> Vec<PendingMutation> {
        let now = Utc::now();
        let mut dispatched = Vec::with_capacity(chunk.len());

        for m in chunk {
            let next_attempt = self.backoff.next_attempt_at(m.attempts, now);
            match self.store.mark_syncing(m.id, next_attempt).await {
                Ok(()) => dispatched.push(m.clone()),
                // One bad record never takes down the batch.
                Err(e) => tracing::error!("could not mark {} syncing, skipping: {}", m.id, e),
            }
        }

        dispatched
    }

    async fn apply_results(
        &self,
        dispatched: &[PendingMutation],
        response: SyncBatchResponse,
        report: &mut DrainReport,
    ) {
        let known: HashSet<Uuid> = dispatched.iter().map(|m| m.id).collect();
        let mut acked: HashSet<Uuid> = HashSet::new();

        for result in response.results {
            if !known.contains(&result.id) {
                tracing::warn!("server reported a result for unknown mutation {}", result.id);
                continue;
            }
            acked.insert(result.id);

            let applied = match result.status {
                RemoteStatus::Synced => {
                    report.succeeded += 1;
                    self.store
                        .update_status(result.id, MutationStatus::Synced, None, Some(Utc::now()))
                        .await
                }
                RemoteStatus::Failed => {
                    report.failed += 1;
                    let reason = result.error.as_deref().unwrap_or("rejected by server");
                    self.store
                        .update_status(result.id, MutationStatus::Failed, Some(reason), None)
                        .await
                }
                RemoteStatus::Conflict => {
                    report.failed += 1;
                    let reason = result.error.as_deref().unwrap_or("conflict detected by server");
                    self.store
                        .update_status(result.id, MutationStatus::Conflict, Some(reason), None)
                        .await
                }
            };

            if let Err(e) = applied {
                tracing::error!("could not record result for {}: {}", result.id, e);
            }
        }

        // Items the server did not mention would otherwise sit in `syncing`
        // forever; close them out as failed for this drain.
        for m in dispatched {
            if acked.contains(&m.id) {
                continue;
            }
            report.failed += 1;
            if let Err(e) = self
                .store
                .update_status(
                    m.id,
                    MutationStatus::Failed,
                    Some("not acknowledged by sync server"),
                    None,
                )
                .await
            {
                tracing::error!("could not close out unacknowledged {}: {}", m.id, e);
            }
        }
    }

    async fn return_batch_to_pending(
        &self,
        dispatched: &[PendingMutation],
        report: &mut DrainReport,
    ) {
        for m in dispatched {
            let attempts_now = m.attempts + 1;
            let result = if attempts_now >= self.backoff.max_attempts {
                report.failed += 1;
                self.store
                    .update_status(
                        m.id,
                        MutationStatus::Failed,
                        Some("max sync attempts exceeded"),
                        None,
                    )
                    .await
            } else {
                self.store.revert_to_pending(m.id).await
            };

            if let Err(e) = result {
                tracing::error!("could not return {} to pending: {}", m.id, e);
            }
        }
    }
}
