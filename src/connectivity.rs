//! Reachability tracking for the remote reconciliation service.
//!
//! The monitor holds the current reachable/unreachable state and lets any
//! task observe edge transitions. State changes are deduplicated: setting
//! the same state twice emits nothing, so observers only ever see
//! `became-reachable` / `became-unreachable` edges.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::sync::ReconcileClient;

/// Tracks whether the remote service is currently reachable.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(initially_reachable: bool) -> Self {
        let (state, _) = watch::channel(initially_reachable);
        Self { state }
    }

    /// Current reachability, queryable at any time.
    pub fn is_reachable(&self) -> bool {
        *self.state.borrow()
    }

    /// Records a new observation of the link state.
    ///
    /// Returns `true` if this flipped the state (an edge); duplicate
    /// consecutive observations are dropped without notifying watchers.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });

        if changed {
            if reachable {
                tracing::info!("connectivity: became reachable");
            } else {
                tracing::warn!("connectivity: became unreachable");
            }
        }
        changed
    }

    /// Subscribes to edge transitions.
    ///
    /// `receiver.changed().await` resolves once per edge; the new state is
    /// read with `borrow_and_update()`.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Periodically probes the remote health endpoint and feeds the monitor.
///
/// Runs until the owning task is dropped. Probe failures flip the monitor
/// to unreachable; the next successful probe flips it back, emitting the
/// `became-reachable` edge that triggers a drain.
pub async fn probe_loop(
    monitor: Arc<ConnectivityMonitor>,
    client: ReconcileClient,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let reachable = client.check_server().await;
        monitor.set_reachable(reachable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert!(ConnectivityMonitor::new(true).is_reachable());
        assert!(!ConnectivityMonitor::new(false).is_reachable());
    }

    #[test]
    fn test_duplicate_observations_are_not_edges() {
        let monitor = ConnectivityMonitor::new(false);

        assert!(!monitor.set_reachable(false));
        assert!(monitor.set_reachable(true));
        assert!(!monitor.set_reachable(true));
        assert!(monitor.set_reachable(false));
    }

    #[tokio::test]
    async fn test_watcher_sees_each_edge_once() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.watch();

        monitor.set_reachable(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        // A duplicate observation produces no new notification.
        monitor.set_reachable(true);
        assert!(!rx.has_changed().unwrap());

        monitor.set_reachable(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_query_is_synchronous_with_latest_observation() {
        let monitor = ConnectivityMonitor::new(true);
        monitor.set_reachable(false);
        assert!(!monitor.is_reachable());
        monitor.set_reachable(true);
        assert!(monitor.is_reachable());
    }
}
