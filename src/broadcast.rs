//! Fan-out of sync progress to attached foreground contexts.

use tokio::sync::broadcast;
use uuid::Uuid;

/// Events published by the background agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A mutation was accepted offline and stored durably.
    ItemStored { id: Uuid },
    /// A drain began.
    SyncStarted,
    /// A drain finished; counts cover the items it dispatched.
    SyncComplete {
        succeeded: usize,
        failed: usize,
        total: usize,
    },
    /// A drain could not run or was cut short.
    SyncFailed { reason: String },
}

/// Best-effort broadcaster of [`SyncEvent`]s.
///
/// Delivery fans out to every currently attached receiver. A context that
/// attaches after an event fired does not see it retroactively; it should
/// bootstrap from the store's aggregate counts instead.
#[derive(Debug, Clone)]
pub struct StatusBroadcaster {
    sender: broadcast::Sender<SyncEvent>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        // Slow receivers that fall more than a buffer behind miss events
        // rather than blocking the agent.
        let (sender, _) = broadcast::channel(32);
        Self { sender }
    }

    /// Publishes an event to all attached contexts.
    pub fn notify(&self, event: SyncEvent) {
        tracing::debug!("broadcast: {:?}", event);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Attaches a new foreground context.
    pub fn attach(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
