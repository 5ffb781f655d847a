//! # Sync Agent
//!
//! Background task that keeps the sync queue draining.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │   wake-up sources                                                       │
//! │   ───────────────                                                       │
//! │   interval tick (drain_interval_secs) ─┐                               │
//! │   connectivity: offline ─► online ─────┤                               │
//! │   handle.trigger() ────────────────────┼──► PaymentEngine::drain()     │
//! │   retry timer (exponential backoff) ───┘          │                    │
//! │                                                   ▼                    │
//! │                                             DrainReport                 │
//! │                                   ┌───────────────┼──────────────┐     │
//! │                                   ▼               ▼              ▼     │
//! │                             store failed      complete      offline    │
//! │                             schedule retry    reset backoff  wait for  │
//! │                             (500ms .. 5min)   last_sync=now  watch     │
//! │                                                                         │
//! │   STATUS EVENTS: emit_status after every pass                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A pass that starts offline pings the remote store first. A failed remote
//! call marks the oracle offline, and without a `ConnectivityMonitor` that
//! ping is the only thing that marks it online again.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::drain::DrainReport;
use crate::engine::PaymentEngine;
use crate::error::{EngineError, EngineResult};
use crate::events::{NoOpEmitter, SyncEventEmitter, SyncStatus};

// =============================================================================
// Retry Policy
// =============================================================================

/// Decides when to retry after a pass that hit a transport failure.
struct RetryPolicy {
    backoff: ExponentialBackoff,
}

impl RetryPolicy {
    fn new(initial: Duration, max: Duration) -> Self {
        let mut backoff = ExponentialBackoff {
            initial_interval: initial,
            max_interval: max,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        RetryPolicy { backoff }
    }

    /// Delay before the next retry, or `None` when no retry is needed.
    fn after_pass(&mut self, failed: bool) -> Option<Duration> {
        if failed {
            self.backoff.next_backoff()
        } else {
            self.backoff.reset();
            None
        }
    }
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Runs drain passes in the background.
pub struct SyncAgent {
    engine: PaymentEngine,

    drain_interval: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,

    /// Current sync status.
    status: Arc<RwLock<SyncStatus>>,

    /// Event emitter for frontend notifications.
    emitter: Arc<dyn SyncEventEmitter>,

    shutdown_tx: Option<mpsc::Sender<()>>,
    trigger_tx: Option<mpsc::Sender<()>>,
}

impl SyncAgent {
    /// Creates a new sync agent.
    pub fn new(engine: PaymentEngine, config: &EngineConfig) -> Self {
        Self::with_emitter(engine, config, Arc::new(NoOpEmitter))
    }

    /// Creates a new sync agent with a custom event emitter.
    pub fn with_emitter(
        engine: PaymentEngine,
        config: &EngineConfig,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let status = SyncStatus {
            online: engine.connectivity().is_online(),
            ..Default::default()
        };

        SyncAgent {
            engine,
            drain_interval: config.drain_interval(),
            initial_backoff: Duration::from_millis(config.sync.initial_backoff_ms),
            max_backoff: Duration::from_secs(config.sync.max_backoff_secs),
            status: Arc::new(RwLock::new(status)),
            emitter,
            shutdown_tx: None,
            trigger_tx: None,
        }
    }

    /// Returns the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Starts the drain loop.
    ///
    /// The first pass runs immediately, picking up whatever a previous run
    /// left in the queue.
    pub async fn start(&mut self) -> EngineResult<SyncAgentHandle> {
        if self.shutdown_tx.is_some() {
            return Err(EngineError::Internal("Sync agent already started".into()));
        }

        let pending = self.engine.pending_sync_count().await?;
        if self.engine.connectivity().is_forced_offline() {
            info!(pending, "Sync agent starting in offline mode");
        } else {
            info!(
                pending,
                interval_secs = self.drain_interval.as_secs(),
                "Starting sync agent"
            );
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());
        self.trigger_tx = Some(trigger_tx.clone());

        let worker = DrainLoop {
            engine: self.engine.clone(),
            status: self.status.clone(),
            emitter: self.emitter.clone(),
            drain_interval: self.drain_interval,
            retry: RetryPolicy::new(self.initial_backoff, self.max_backoff),
            online_rx: self.engine.connectivity().subscribe(),
            trigger_rx,
            shutdown_rx,
        };
        tokio::spawn(worker.run());

        Ok(SyncAgentHandle::new(
            shutdown_tx,
            trigger_tx,
            self.status.clone(),
        ))
    }

    /// Asks the running loop for a drain pass now.
    pub fn trigger(&self) -> EngineResult<()> {
        match &self.trigger_tx {
            Some(tx) => match tx.try_send(()) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
                Err(mpsc::error::TrySendError::Closed(())) => Err(EngineError::ShuttingDown),
            },
            None => Err(EngineError::ShuttingDown),
        }
    }

    /// Stops the drain loop. A pass in progress finishes its current entry.
    pub async fn shutdown(&mut self) -> EngineResult<()> {
        info!("Shutting down sync agent");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        self.trigger_tx = None;

        info!("Sync agent stopped");
        Ok(())
    }
}

// =============================================================================
// Drain Loop
// =============================================================================

struct DrainLoop {
    engine: PaymentEngine,
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
    drain_interval: Duration,
    retry: RetryPolicy,
    online_rx: watch::Receiver<bool>,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl DrainLoop {
    async fn run(mut self) {
        let mut interval = tokio::time::interval(self.drain_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut retry_at: Option<Instant> = None;

        loop {
            let retry = async move {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = interval.tick() => {}

                _ = retry => {
                    debug!("Retrying drain after backoff");
                }

                Some(()) = self.trigger_rx.recv() => {
                    debug!("Drain triggered");
                }

                Ok(()) = self.online_rx.changed() => {
                    let online = *self.online_rx.borrow_and_update();
                    self.status.write().await.online = online;
                    if !online {
                        continue;
                    }
                    info!("Connectivity restored, draining sync queue");
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Drain loop received shutdown");
                    break;
                }
            }

            if let Some(delay) = self.pass().await {
                retry_at = Some(Instant::now() + delay);
            } else {
                retry_at = None;
            }
        }

        info!("Drain loop stopped");
    }

    /// One drain pass. Returns the retry delay when one is needed.
    async fn pass(&mut self) -> Option<Duration> {
        let connectivity = self.engine.connectivity();
        if !connectivity.is_online() && !connectivity.is_forced_offline() {
            self.engine.check_connectivity().await;
        }

        match self.engine.drain().await {
            Ok(report) if report.already_running => None,
            Ok(report) => {
                let delay = self.retry.after_pass(!report.failed_stores.is_empty());
                if let Some(delay) = delay {
                    warn!(
                        remaining = report.remaining,
                        retry_in_ms = delay.as_millis() as u64,
                        "Drain incomplete, scheduling retry"
                    );
                }
                self.publish(&report, None).await;
                delay
            }
            Err(e) => {
                error!(error = %e, "Drain pass failed");
                let delay = self.retry.after_pass(true);
                self.publish(&DrainReport::default(), Some(e.to_string()))
                    .await;
                delay
            }
        }
    }

    async fn publish(&self, report: &DrainReport, failure: Option<String>) {
        let current = match self.engine.status().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Failed to read sync status");
                return;
            }
        };

        let snapshot = {
            let mut s = self.status.write().await;
            s.online = current.online;
            s.pending_count = current.pending_count;
            s.needs_review_count = current.needs_review_count;
            s.draining = false;

            if failure.is_some() {
                s.last_error = failure;
            } else if report.hit_transport_failure() && !report.skipped_offline {
                s.last_error = Some(format!(
                    "Remote store unreachable for {:?}",
                    report.failed_stores
                ));
            } else if report.is_complete() && !report.skipped_offline {
                s.last_sync = Some(Utc::now());
                s.last_error = None;
            }
            s.clone()
        };

        self.emitter.emit_status(&snapshot);
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for controlling a running SyncAgent from outside.
#[derive(Clone)]
pub struct SyncAgentHandle {
    shutdown_tx: mpsc::Sender<()>,
    trigger_tx: mpsc::Sender<()>,
    status: Arc<RwLock<SyncStatus>>,
}

impl SyncAgentHandle {
    pub(crate) fn new(
        shutdown_tx: mpsc::Sender<()>,
        trigger_tx: mpsc::Sender<()>,
        status: Arc<RwLock<SyncStatus>>,
    ) -> Self {
        SyncAgentHandle {
            shutdown_tx,
            trigger_tx,
            status,
        }
    }

    /// Gets the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Asks for a drain pass now. Requests made while one is already
    /// waiting are merged.
    pub fn trigger(&self) -> EngineResult<()> {
        match self.trigger_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(EngineError::ShuttingDown),
        }
    }

    /// Signals the agent to shut down gracefully.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating SyncAgent with options.
pub struct SyncAgentBuilder {
    engine: PaymentEngine,
    config: EngineConfig,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncAgentBuilder {
    /// Creates a new builder for the given engine.
    pub fn new(engine: PaymentEngine) -> Self {
        SyncAgentBuilder {
            engine,
            config: EngineConfig::default(),
            emitter: None,
        }
    }

    /// Takes intervals and backoff bounds from `[sync]`.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Builds the SyncAgent.
    pub fn build(self) -> SyncAgent {
        match self.emitter {
            Some(emitter) => SyncAgent::with_emitter(self.engine, &self.config, emitter),
            None => SyncAgent::new(self.engine, &self.config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MemoryAccountBook;
    use crate::connectivity::ConnectivityOracle;
    use crate::remote::{FailureMode, MemoryRemoteStore};
    use billbook_core::{Identity, Money, PaymentInput, PaymentMode};
    use billbook_db::{Database, DbConfig};
    use chrono::NaiveDate;

    #[test]
    fn test_retry_policy_grows_then_resets() {
        let mut policy = RetryPolicy::new(Duration::from_millis(500), Duration::from_secs(1));

        let first = policy.after_pass(true).unwrap();
        assert!(first <= Duration::from_millis(750));

        for _ in 0..10 {
            let delay = policy.after_pass(true).unwrap();
            assert!(delay <= Duration::from_millis(1500));
        }

        assert_eq!(policy.after_pass(false), None);
        let after_reset = policy.after_pass(true).unwrap();
        assert!(after_reset <= Duration::from_millis(750));
    }

    async fn wait_for_empty_queue(engine: &PaymentEngine) -> bool {
        for _ in 0..100 {
            if engine.pending_sync_count().await.unwrap() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_agent_drains_when_connectivity_returns() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(MemoryRemoteStore::new());
        let oracle = ConnectivityOracle::new(false);
        let engine = PaymentEngine::new(
            db,
            remote.clone(),
            Arc::new(MemoryAccountBook::new()),
            oracle.clone(),
        );

        engine
            .record_payment(PaymentInput {
                invoice_id: Identity::remote("INV-1"),
                party_id: "party-1".into(),
                amount: Money::from_minor(25_000),
                mode: PaymentMode::Bank,
                payment_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
                reference: Some("UTR-1".into()),
                notes: None,
                grand_total: Money::from_minor(100_000),
            })
            .await
            .unwrap();
        assert!(engine.pending_sync_count().await.unwrap() > 0);

        let mut config = EngineConfig::default();
        config.sync.drain_interval_secs = 3600;
        let mut agent = SyncAgentBuilder::new(engine.clone())
            .with_config(config)
            .build();
        let handle = agent.start().await.unwrap();

        oracle.set_online(true);

        assert!(wait_for_empty_queue(&engine).await);
        assert_eq!(remote.count(billbook_core::StoreKind::Payments).await, 1);

        handle.shutdown().await;
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_agent_comes_back_online_without_a_monitor() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(MemoryRemoteStore::new());
        let oracle = ConnectivityOracle::new(true);
        let engine = PaymentEngine::new(
            db,
            remote.clone(),
            Arc::new(MemoryAccountBook::new()),
            oracle.clone(),
        );

        // One failed create marks the oracle offline.
        remote.fail_next(FailureMode::Unreachable).await;
        let outcome = engine
            .record_payment(PaymentInput {
                invoice_id: Identity::remote("INV-1"),
                party_id: "party-1".into(),
                amount: Money::from_minor(25_000),
                mode: PaymentMode::Cash,
                payment_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
                reference: None,
                notes: None,
                grand_total: Money::from_minor(100_000),
            })
            .await
            .unwrap();
        assert_eq!(outcome.disposition, billbook_core::SyncDisposition::Queued);
        assert!(!oracle.is_online());

        let mut config = EngineConfig::default();
        config.sync.drain_interval_secs = 3600;
        let mut agent = SyncAgentBuilder::new(engine.clone())
            .with_config(config)
            .build();
        let handle = agent.start().await.unwrap();

        assert!(wait_for_empty_queue(&engine).await);
        assert!(oracle.is_online());
        assert_eq!(remote.count(billbook_core::StoreKind::Payments).await, 1);

        handle.shutdown().await;
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_is_an_error() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = PaymentEngine::new(
            db,
            Arc::new(MemoryRemoteStore::new()),
            Arc::new(MemoryAccountBook::new()),
            ConnectivityOracle::new(true),
        );
        let mut agent = SyncAgent::new(engine, &EngineConfig::default());

        let handle = agent.start().await.unwrap();
        assert!(handle.trigger().is_ok());
        assert!(matches!(agent.start().await, Err(EngineError::Internal(_))));

        agent.shutdown().await.unwrap();
    }
}
