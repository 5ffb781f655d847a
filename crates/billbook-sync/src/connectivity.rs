//! # Connectivity Oracle
//!
//! Answers "should we try the network right now?" without making a call.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │         ping ok                                ping failed              │
//! │   ┌──────────────┐                        ┌──────────────┐             │
//! │   │              ▼                        │              ▼             │
//! │  OFFLINE ──────────────────► ONLINE ──────────────────► OFFLINE        │
//! │                                 │                                       │
//! │                                 └─► watch subscribers wake up          │
//! │                                     (SyncAgent drains immediately)     │
//! │                                                                         │
//! │  forced_offline (config `sync.offline`): always OFFLINE, never probes  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The oracle is a hint, not a guarantee: callers still treat every remote
//! failure as possible.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::remote::RemoteStore;

// =============================================================================
// Oracle
// =============================================================================

/// Shared online/offline flag.
///
/// Cheap to clone; all clones see the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityOracle {
    tx: Arc<watch::Sender<bool>>,
    forced_offline: bool,
}

impl ConnectivityOracle {
    /// Creates an oracle starting in `online`.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        ConnectivityOracle {
            tx: Arc::new(tx),
            forced_offline: false,
        }
    }

    /// An oracle that never reports online.
    pub fn forced_offline() -> Self {
        let (tx, _rx) = watch::channel(false);
        ConnectivityOracle {
            tx: Arc::new(tx),
            forced_offline: true,
        }
    }

    /// Current belief.
    pub fn is_online(&self) -> bool {
        !self.forced_offline && *self.tx.borrow()
    }

    pub fn is_forced_offline(&self) -> bool {
        self.forced_offline
    }

    /// Records an observation.
    ///
    /// ## Returns
    /// `true` when the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        if self.forced_offline {
            return false;
        }

        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    /// Receiver that wakes on every change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Probes the remote store on an interval and feeds the oracle.
pub struct ConnectivityMonitor {
    oracle: ConnectivityOracle,
    remote: Arc<dyn RemoteStore>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running monitor.
#[derive(Clone)]
pub struct ConnectivityMonitorHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ConnectivityMonitorHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::ChannelError("Monitor shutdown channel closed".into()))
    }
}

impl ConnectivityMonitor {
    /// Creates a monitor and returns its handle.
    pub fn new(
        oracle: ConnectivityOracle,
        remote: Arc<dyn RemoteStore>,
        interval: Duration,
    ) -> (Self, ConnectivityMonitorHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let monitor = ConnectivityMonitor {
            oracle,
            remote,
            interval,
            shutdown_rx,
        };
        (monitor, ConnectivityMonitorHandle { shutdown_tx })
    }

    /// One probe. Returns the observed state.
    pub async fn probe(&self) -> bool {
        let online = match self.remote.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        };
        self.oracle.set_online(online);
        online
    }

    /// Runs the probe loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        if self.oracle.is_forced_offline() {
            info!("Connectivity monitor not started (forced offline)");
            return;
        }

        info!(interval_secs = self.interval.as_secs(), "Connectivity monitor starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.probe().await;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Connectivity monitor shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{FailureMode, MemoryRemoteStore};

    #[test]
    fn test_set_online_reports_changes_only() {
        let oracle = ConnectivityOracle::new(false);
        assert!(!oracle.is_online());
        assert!(oracle.set_online(true));
        assert!(!oracle.set_online(true));
        assert!(oracle.clone().is_online());
    }

    #[test]
    fn test_forced_offline_ignores_observations() {
        let oracle = ConnectivityOracle::forced_offline();
        assert!(!oracle.set_online(true));
        assert!(!oracle.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_regain() {
        let oracle = ConnectivityOracle::new(false);
        let mut rx = oracle.subscribe();

        oracle.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_probe_follows_remote() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let oracle = ConnectivityOracle::new(true);
        let (monitor, _handle) =
            ConnectivityMonitor::new(oracle.clone(), remote.clone(), Duration::from_secs(1));

        remote.set_failure(FailureMode::Unreachable).await;
        assert!(!monitor.probe().await);
        assert!(!oracle.is_online());

        remote.set_failure(FailureMode::Healthy).await;
        assert!(monitor.probe().await);
        assert!(oracle.is_online());
    }
}
