//! The long-lived background agent.
//!
//! One agent runs per device. It owns the durable store, the connectivity
//! monitor, and the orchestrator; foreground contexts talk to it only
//! through an [`AgentHandle`] (commands in over mpsc, broadcast events
//! out) and never touch the store directly.
//!
//! Four trigger sources converge on the same drain entry point: the
//! `became-reachable` edge, a periodic timer, an explicit force-sync
//! command, and a deferred wake scheduled by the platform. The
//! orchestrator's single-flight guard makes overlapping triggers safe.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::broadcast::{StatusBroadcaster, SyncEvent};
use crate::config::Config;
use crate::connectivity::{probe_loop, ConnectivityMonitor};
use crate::db::{DeviceStore, MutationStore, ResponseCache, StoreError};
use crate::interceptor::{default_routes, RequestRouter, RouterError};
use crate::models::{MutationStatus, PendingMutation, StatusCounts};
use crate::sync::{ClientError, ReconcileClient, SyncOrchestrator};

/// Which trigger invoked a drain. Logged, never branched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Reconnected,
    Interval,
    Manual,
    Deferred,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Reconnected => write!(f, "reconnected"),
            TriggerSource::Interval => write!(f, "interval"),
            TriggerSource::Manual => write!(f, "manual"),
            TriggerSource::Deferred => write!(f, "deferred"),
        }
    }
}

/// Commands a foreground context may send to the agent.
#[derive(Debug)]
pub enum AgentCommand {
    ForceSync,
    DeferredSync,
    GetPending {
        respond_to: oneshot::Sender<Result<Vec<PendingMutation>, StoreError>>,
    },
    GetCounts {
        respond_to: oneshot::Sender<Result<StatusCounts, StoreError>>,
    },
    ClearSynced {
        respond_to: oneshot::Sender<Result<u64, StoreError>>,
    },
    ClearAll {
        respond_to: oneshot::Sender<Result<u64, StoreError>>,
    },
    Resubmit {
        id: Uuid,
        respond_to: oneshot::Sender<Result<(), StoreError>>,
    },
    Shutdown,
}

/// Errors surfaced through the handle.
#[derive(Debug)]
pub enum AgentError {
    /// The agent is gone; its command channel is closed.
    ChannelClosed,
    /// A store operation failed inside the agent.
    Store(StoreError),
    /// The reconciliation client could not be constructed.
    Client(ClientError),
    /// The request router could not be constructed.
    Router(RouterError),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::ChannelClosed => write!(f, "Background agent is not running"),
            AgentError::Store(e) => write!(f, "Storage error: {}", e),
            AgentError::Client(e) => write!(f, "{}", e),
            AgentError::Router(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Store(e) => Some(e),
            AgentError::Client(e) => Some(e),
            AgentError::Router(e) => Some(e),
            AgentError::ChannelClosed => None,
        }
    }
}

impl From<StoreError> for AgentError {
    fn from(e: StoreError) -> Self {
        AgentError::Store(e)
    }
}

impl From<ClientError> for AgentError {
    fn from(e: ClientError) -> Self {
        AgentError::Client(e)
    }
}

impl From<RouterError> for AgentError {
    fn from(e: RouterError) -> Self {
        AgentError::Router(e)
    }
}

/// Foreground-side handle to a running agent.
#[derive(Clone)]
pub struct AgentHandle {
    commands: mpsc::Sender<AgentCommand>,
    broadcaster: StatusBroadcaster,
}

impl AgentHandle {
    /// Asks the agent to drain now. The outcome arrives as broadcast
    /// events, never as a blocking reply.
    pub async fn force_sync(&self) -> Result<(), AgentError> {
        self.commands
            .send(AgentCommand::ForceSync)
            .await
            .map_err(|_| AgentError::ChannelClosed)
    }

    /// Schedules a one-shot deferred drain, the message-passing analog of
    /// a platform background-execution callback.
    pub fn schedule_deferred_sync(&self, delay: Duration) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(AgentCommand::DeferredSync).await;
        });
    }

    /// Lists every record not yet delivered (pending, syncing, failed,
    /// conflict), in creation order.
    pub async fn pending(&self) -> Result<Vec<PendingMutation>, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(AgentCommand::GetPending { respond_to: tx })
            .await
            .map_err(|_| AgentError::ChannelClosed)?;
        rx.await
            .map_err(|_| AgentError::ChannelClosed)?
            .map_err(AgentError::Store)
    }

    /// Aggregate per-status counts, for bootstrapping late-attached views.
    pub async fn counts(&self) -> Result<StatusCounts, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(AgentCommand::GetCounts { respond_to: tx })
            .await
            .map_err(|_| AgentError::ChannelClosed)?;
        rx.await
            .map_err(|_| AgentError::ChannelClosed)?
            .map_err(AgentError::Store)
    }

    pub async fn clear_synced(&self) -> Result<u64, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(AgentCommand::ClearSynced { respond_to: tx })
            .await
            .map_err(|_| AgentError::ChannelClosed)?;
        rx.await
            .map_err(|_| AgentError::ChannelClosed)?
            .map_err(AgentError::Store)
    }

    pub async fn clear_all(&self) -> Result<u64, AgentError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(AgentCommand::ClearAll { respond_to: tx })
            .await
            .map_err(|_| AgentError::ChannelClosed)?;
        rx.await
            .map_err(|_| AgentError::ChannelClosed)?
            .map_err(AgentError::Store)
    }

    /// Resets a permanently failed record for another delivery round.
    pub async fn resubmit(&self, id: Uuid) -> Result<(), AgentError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(AgentCommand::Resubmit { id, respond_to: tx })
            .await
            .map_err(|_| AgentError::ChannelClosed)?;
        rx.await
            .map_err(|_| AgentError::ChannelClosed)?
            .map_err(AgentError::Store)
    }

    /// Attaches to the event stream. Only events published after this
    /// call are delivered.
    pub fn attach_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.broadcaster.attach()
    }

    pub async fn shutdown(&self) -> Result<(), AgentError> {
        self.commands
            .send(AgentCommand::Shutdown)
            .await
            .map_err(|_| AgentError::ChannelClosed)
    }
}

/// The background execution context for one device.
pub struct BackgroundAgent {
    store: MutationStore,
    orchestrator: Arc<SyncOrchestrator>,
    monitor: Arc<ConnectivityMonitor>,
    probe_client: ReconcileClient,
    commands: mpsc::Receiver<AgentCommand>,
    device_id: Uuid,
    sync_interval: Duration,
    probe_interval: Duration,
}

impl BackgroundAgent {
    /// Assembles the agent, its handle, and the request router sharing the
    /// same store, monitor, and broadcaster.
    pub async fn new(
        config: &Config,
        pool: SqlitePool,
    ) -> Result<(Self, AgentHandle, RequestRouter), AgentError> {
        let store = MutationStore::new(pool.clone());
        let cache = ResponseCache::new(pool.clone());
        let device_id = DeviceStore::new(pool).get_or_create().await?;

        // Starts unreachable; the first probe flips it and the resulting
        // became-reachable edge triggers the initial drain.
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let broadcaster = StatusBroadcaster::new();
        let client = ReconcileClient::from_config(config)?;

        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            client.clone(),
            monitor.clone(),
            broadcaster.clone(),
            device_id,
            config,
        ));

        let router = RequestRouter::new(
            config,
            default_routes(),
            store.clone(),
            cache,
            monitor.clone(),
            broadcaster.clone(),
            device_id,
        )?;

        let (tx, rx) = mpsc::channel(32);

        let agent = Self {
            store,
            orchestrator,
            monitor,
            probe_client: client,
            commands: rx,
            device_id,
            sync_interval: Duration::from_secs(config.sync_interval_secs),
            probe_interval: Duration::from_secs(config.probe_interval_secs),
        };
        let handle = AgentHandle {
            commands: tx,
            broadcaster,
        };

        Ok((agent, handle, router))
    }

    /// Runs until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        match self.store.recover_stranded().await {
            Ok(0) => {}
            Ok(n) => tracing::info!("recovered {} record(s) stranded in syncing", n),
            Err(e) => tracing::error!("could not recover stranded records: {}", e),
        }

        // Subscribe before the probe starts so its first edge is never missed.
        let mut connectivity = self.monitor.watch();
        let probe = tokio::spawn(probe_loop(
            self.monitor.clone(),
            self.probe_client.clone(),
            self.probe_interval,
        ));
        let mut ticker = tokio::time::interval(self.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick is immediate; swallow it so the timer is periodic.
        ticker.tick().await;

        tracing::info!("background agent running (device {})", self.device_id);

        loop {
            tokio::select! {
                maybe_command = self.commands.recv() => {
                    match maybe_command {
                        None | Some(AgentCommand::Shutdown) => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *connectivity.borrow_and_update() {
                        self.drain(TriggerSource::Reconnected).await;
                    }
                }
                _ = ticker.tick() => {
                    self.drain(TriggerSource::Interval).await;
                }
            }
        }

        probe.abort();
        tracing::info!("background agent stopped");
    }

    async fn handle_command(&self, command: AgentCommand) {
        match command {
            AgentCommand::ForceSync => self.drain(TriggerSource::Manual).await,
            AgentCommand::DeferredSync => self.drain(TriggerSource::Deferred).await,
            AgentCommand::GetPending { respond_to } => {
                let result = self
                    .store
                    .list_by_statuses(&[
                        MutationStatus::Pending,
                        MutationStatus::Syncing,
                        MutationStatus::Failed,
                        MutationStatus::Conflict,
                    ])
                    .await;
                let _ = respond_to.send(result);
            }
            AgentCommand::GetCounts { respond_to } => {
                let _ = respond_to.send(self.store.counts().await);
            }
            AgentCommand::ClearSynced { respond_to } => {
                let _ = respond_to.send(self.store.clear(Some(MutationStatus::Synced)).await);
            }
            AgentCommand::ClearAll { respond_to } => {
                let _ = respond_to.send(self.store.clear(None).await);
            }
            AgentCommand::Resubmit { id, respond_to } => {
                let _ = respond_to.send(self.store.resubmit(id).await);
            }
            // Handled in the run loop.
            AgentCommand::Shutdown => {}
        }
    }

    async fn drain(&self, source: TriggerSource) {
        tracing::debug!("drain trigger: {}", source);
        match self.orchestrator.drain().await {
            Ok(outcome) => tracing::debug!("drain outcome: {:?}", outcome),
            // A storage failure kills this drain only, never the agent.
            Err(e) => tracing::error!("drain failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::{EntityType, MutationAction};
    use crate::sync::protocol::{ItemResult, RemoteStatus, SyncBatchRequest, SyncBatchResponse};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use tempfile::tempdir;

    async fn spawn_accepting_server() -> String {
        async fn batch(Json(request): Json<SyncBatchRequest>) -> Json<SyncBatchResponse> {
            let results = request
                .items
                .iter()
                .map(|item| ItemResult {
                    id: item.id,
                    status: RemoteStatus::Synced,
                    error: None,
                })
                .collect();
            Json(SyncBatchResponse {
                success: true,
                results,
            })
        }

        let app = Router::new()
            .route("/sync/batch", post(batch))
            .route("/health", get(|| async { "ok" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn test_config(url: &str) -> Config {
        let mut config = Config::default();
        config.remote_url = Some(url.to_string());
        config.batch_timeout_secs = 2;
        config.probe_interval_secs = 1;
        config.backoff_base_secs = 0;
        config
    }

    async fn recv_event(
        events: &mut broadcast::Receiver<SyncEvent>,
        within: Duration,
    ) -> SyncEvent {
        tokio::time::timeout(within, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_reconnection_edge_drains_stored_mutations() {
        let url = spawn_accepting_server().await;
        let temp = tempdir().unwrap();
        let pool = init_db(temp.path().join("test.db")).await.unwrap();
        let config = test_config(&url);

        // Captured before the agent comes up.
        let store = MutationStore::new(pool.clone());
        let device_id = DeviceStore::new(pool.clone()).get_or_create().await.unwrap();
        for i in 0..2 {
            let m = PendingMutation::new(
                EntityType::Appointment,
                MutationAction::Create,
                json!({"seq": i}),
                device_id,
            );
            store.append(&m).await.unwrap();
        }

        let (agent, handle, _router) = BackgroundAgent::new(&config, pool).await.unwrap();
        let mut events = handle.attach_events();
        let running = tokio::spawn(agent.run());

        // The first probe flips the monitor; the became-reachable edge
        // triggers the drain without any explicit command.
        assert_eq!(
            recv_event(&mut events, Duration::from_secs(5)).await,
            SyncEvent::SyncStarted
        );
        assert_eq!(
            recv_event(&mut events, Duration::from_secs(5)).await,
            SyncEvent::SyncComplete {
                succeeded: 2,
                failed: 0,
                total: 2
            }
        );

        let counts = handle.counts().await.unwrap();
        assert_eq!(counts.synced, 2);
        assert_eq!(counts.unsynced(), 0);

        handle.shutdown().await.unwrap();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_force_sync_and_queries_roundtrip() {
        let url = spawn_accepting_server().await;
        let temp = tempdir().unwrap();
        let pool = init_db(temp.path().join("test.db")).await.unwrap();
        let config = test_config(&url);

        let store = MutationStore::new(pool.clone());
        let device_id = DeviceStore::new(pool.clone()).get_or_create().await.unwrap();
        let first = PendingMutation::new(
            EntityType::VitalsReading,
            MutationAction::Create,
            json!({"bp": "118/76"}),
            device_id,
        );
        store.append(&first).await.unwrap();

        let (agent, handle, _router) = BackgroundAgent::new(&config, pool).await.unwrap();
        let mut events = handle.attach_events();
        let running = tokio::spawn(agent.run());

        // The reconnection edge drains the record appended before startup.
        assert_eq!(
            recv_event(&mut events, Duration::from_secs(5)).await,
            SyncEvent::SyncStarted
        );
        assert_eq!(
            recv_event(&mut events, Duration::from_secs(5)).await,
            SyncEvent::SyncComplete {
                succeeded: 1,
                failed: 0,
                total: 1
            }
        );
        assert!(handle.pending().await.unwrap().is_empty());

        // A record appended while the agent is idle waits for the next
        // trigger; force-sync is that trigger.
        let second = PendingMutation::new(
            EntityType::QueueEntry,
            MutationAction::Create,
            json!({"patient": "p-12"}),
            device_id,
        );
        store.append(&second).await.unwrap();

        let listed = handle.pending().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second.id);

        handle.force_sync().await.unwrap();
        assert_eq!(
            recv_event(&mut events, Duration::from_secs(5)).await,
            SyncEvent::SyncStarted
        );
        assert_eq!(
            recv_event(&mut events, Duration::from_secs(5)).await,
            SyncEvent::SyncComplete {
                succeeded: 1,
                failed: 0,
                total: 1
            }
        );

        // Synced records stay until an explicit clear.
        assert_eq!(handle.counts().await.unwrap().synced, 2);
        assert_eq!(handle.clear_synced().await.unwrap(), 2);
        assert_eq!(handle.counts().await.unwrap().total(), 0);

        handle.shutdown().await.unwrap();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_capture_through_router_then_synced() {
        let url = spawn_accepting_server().await;
        let temp = tempdir().unwrap();
        let pool = init_db(temp.path().join("test.db")).await.unwrap();
        let config = test_config(&url);

        let (agent, handle, router) = BackgroundAgent::new(&config, pool).await.unwrap();
        let mut events = handle.attach_events();

        // The agent is not running yet and the monitor starts unreachable,
        // so the request is captured instead of forwarded.
        let response = router
            .handle(crate::interceptor::OutboundRequest::new(
                crate::interceptor::RequestMethod::Post,
                "/api/appointments",
                Some(json!({"patient": "p-4", "slot": "14:00"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status_code(), 202);

        let running = tokio::spawn(agent.run());

        // item-stored fired at capture time; then the reconnection edge
        // drains the record.
        assert!(matches!(
            recv_event(&mut events, Duration::from_secs(5)).await,
            SyncEvent::ItemStored { .. }
        ));
        assert_eq!(
            recv_event(&mut events, Duration::from_secs(5)).await,
            SyncEvent::SyncStarted
        );
        assert_eq!(
            recv_event(&mut events, Duration::from_secs(5)).await,
            SyncEvent::SyncComplete {
                succeeded: 1,
                failed: 0,
                total: 1
            }
        );

        handle.shutdown().await.unwrap();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_after_shutdown_reports_closed_channel() {
        let url = spawn_accepting_server().await;
        let temp = tempdir().unwrap();
        let pool = init_db(temp.path().join("test.db")).await.unwrap();
        let config = test_config(&url);

        let (agent, handle, _router) = BackgroundAgent::new(&config, pool).await.unwrap();
        let running = tokio::spawn(agent.run());

        handle.shutdown().await.unwrap();
        running.await.unwrap();

        assert!(matches!(
            handle.counts().await,
            Err(AgentError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_agent_requires_remote_url() {
        let temp = tempdir().unwrap();
        let pool = init_db(temp.path().join("test.db")).await.unwrap();
        let config = Config::default();

        let result = BackgroundAgent::new(&config, pool).await;
        assert!(matches!(
            result,
            Err(AgentError::Client(ClientError::NotConfigured))
        ));
    }
}
