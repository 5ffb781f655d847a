//! # Payment Engine
//!
//! The inbound interface: everything the UI or the daemon calls.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          PaymentEngine                                  │
//! │                                                                         │
//! │  record_payment ──► PaymentRecorder ─┐                                 │
//! │  delete_payment ──► PaymentReversal ─┤  (write_lock: one writer)       │
//! │                                      │                                  │
//! │  list_payments_for_invoice ─► PaymentResolver                          │
//! │  reconcile_invoice ─────────► Reconciler                               │
//! │  drain ─────────────────────► QueueDrainer (drain_lock: single-flight) │
//! │                                                                         │
//! │                        EngineContext                                    │
//! │   ┌──────────┬───────────────┬──────────────┬──────────────┐           │
//! │   │ Database │ RemoteStore   │ AccountBook  │ Connectivity │           │
//! │   │ (sqlite) │ (http/memory) │ (sqlite/mem) │ Oracle       │           │
//! │   └──────────┴───────────────┴──────────────┴──────────────┘           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use billbook_core::{
    Identity, InvoiceAggregate, GuardMode, Payment, PaymentInput, SyncDisposition, Tolerance,
};
use billbook_db::Database;

use crate::accounts::AccountBook;
use crate::config::EngineConfig;
use crate::connectivity::ConnectivityOracle;
use crate::drain::{DrainReport, QueueDrainer};
use crate::error::EngineResult;
use crate::events::{NoOpEmitter, SyncEventEmitter, SyncStatus};
use crate::reconciler::Reconciler;
use crate::recorder::{PaymentRecorder, RecordOutcome};
use crate::remote::RemoteStore;
use crate::resolver::PaymentResolver;
use crate::reversal::PaymentReversal;

// =============================================================================
// Shared Context
// =============================================================================

/// Everything the engine components share.
pub(crate) struct EngineContext {
    pub(crate) db: Database,
    pub(crate) remote: Arc<dyn RemoteStore>,
    pub(crate) accounts: Arc<dyn AccountBook>,
    pub(crate) connectivity: ConnectivityOracle,
    pub(crate) emitter: Arc<dyn SyncEventEmitter>,
    pub(crate) reconciler: Reconciler,
    /// Serializes record/delete so the overpayment guard sees every row.
    pub(crate) write_lock: Mutex<()>,
    /// Held for the duration of a drain pass.
    pub(crate) drain_lock: Mutex<()>,
}

// =============================================================================
// Payment Engine
// =============================================================================

/// Offline-first payment engine.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PaymentEngine {
    ctx: Arc<EngineContext>,
}

impl PaymentEngine {
    /// Creates an engine with the default tolerance and no event emitter.
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteStore>,
        accounts: Arc<dyn AccountBook>,
        connectivity: ConnectivityOracle,
    ) -> Self {
        PaymentEngineBuilder::new(db, remote)
            .with_accounts(accounts)
            .with_connectivity(connectivity)
            .build()
    }

    /// Starts a builder.
    pub fn builder(db: Database, remote: Arc<dyn RemoteStore>) -> PaymentEngineBuilder {
        PaymentEngineBuilder::new(db, remote)
    }

    /// Records a payment. Durable locally before any network call.
    ///
    /// ## Errors
    /// - `Invalid`: input failed validation, nothing written
    /// - `Storage`: the local write failed, nothing sent
    /// - `Overpayment`: the invoice would be over-paid, row rolled back
    ///
    /// Remote trouble never errors; see [`RecordOutcome::disposition`].
    pub async fn record_payment(&self, input: PaymentInput) -> EngineResult<RecordOutcome> {
        let outcome = {
            let _writer = self.ctx.write_lock.lock().await;
            PaymentRecorder::new(&self.ctx).record(input).await?
        };
        self.publish_status().await;
        Ok(outcome)
    }

    /// Deletes a payment and reverses its effects.
    pub async fn delete_payment(
        &self,
        payment_id: &Identity,
        invoice_id: &Identity,
    ) -> EngineResult<SyncDisposition> {
        let disposition = {
            let _writer = self.ctx.write_lock.lock().await;
            PaymentReversal::new(&self.ctx)
                .delete(payment_id, invoice_id)
                .await?
        };
        self.publish_status().await;
        Ok(disposition)
    }

    /// Payments of an invoice, newest first, without duplicates.
    pub async fn list_payments_for_invoice(
        &self,
        invoice_id: &Identity,
    ) -> EngineResult<Vec<Payment>> {
        PaymentResolver::new(&self.ctx).list(invoice_id).await
    }

    /// Replays the sync queue. At most one pass runs at a time.
    pub async fn drain(&self) -> EngineResult<DrainReport> {
        let report = QueueDrainer::new(&self.ctx).run().await?;
        if !report.already_running {
            self.publish_status().await;
        }
        Ok(report)
    }

    /// Recomputes an invoice aggregate from its payments (Observe mode).
    ///
    /// Repairs an aggregate left stale by a crash between the payment write
    /// and the aggregate write.
    pub async fn reconcile_invoice(&self, invoice_id: &Identity) -> EngineResult<InvoiceAggregate> {
        let reconciliation = self
            .ctx
            .reconciler
            .reconcile(invoice_id, GuardMode::Observe)
            .await?;
        Ok(reconciliation.aggregate)
    }

    /// Pings the remote store and records the answer in the oracle.
    ///
    /// Record, delete and drain mark the oracle offline when a remote call
    /// fails; only a successful ping marks it online again. The connectivity
    /// monitor calls this on its interval and the sync agent before a pass
    /// that would otherwise be skipped.
    ///
    /// ## Returns
    /// The observed state. Always `false` when forced offline.
    pub async fn check_connectivity(&self) -> bool {
        if self.ctx.connectivity.is_forced_offline() {
            return false;
        }

        let online = match self.ctx.remote.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Remote store still unreachable");
                false
            }
        };
        self.ctx.connectivity.set_online(online);
        online
    }

    /// Entries waiting in the sync queue.
    pub async fn pending_sync_count(&self) -> EngineResult<i64> {
        Ok(self.ctx.db.sync_queue().count_pending().await?)
    }

    /// Payments the remote store refused.
    pub async fn payments_needing_review(&self) -> EngineResult<Vec<Payment>> {
        Ok(self.ctx.db.payments().needing_review().await?)
    }

    /// Current status snapshot.
    pub async fn status(&self) -> EngineResult<SyncStatus> {
        Ok(SyncStatus {
            online: self.ctx.connectivity.is_online(),
            pending_count: self.ctx.db.sync_queue().count_pending().await?,
            needs_review_count: self.ctx.db.payments().needing_review().await?.len() as i64,
            draining: self.ctx.drain_lock.try_lock().is_err(),
            ..Default::default()
        })
    }

    pub fn connectivity(&self) -> &ConnectivityOracle {
        &self.ctx.connectivity
    }

    pub fn database(&self) -> &Database {
        &self.ctx.db
    }

    pub fn tolerance(&self) -> Tolerance {
        self.ctx.reconciler.tolerance()
    }

    async fn publish_status(&self) {
        match self.status().await {
            Ok(status) => self.ctx.emitter.emit_status(&status),
            Err(e) => warn!(error = %e, "Failed to read sync status"),
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a PaymentEngine with options.
pub struct PaymentEngineBuilder {
    db: Database,
    remote: Arc<dyn RemoteStore>,
    accounts: Option<Arc<dyn AccountBook>>,
    connectivity: Option<ConnectivityOracle>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    tolerance: Tolerance,
}

impl PaymentEngineBuilder {
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        PaymentEngineBuilder {
            db,
            remote,
            accounts: None,
            connectivity: None,
            emitter: None,
            tolerance: Tolerance::default(),
        }
    }

    /// Applies `[reconcile]` and `[sync].offline` from the config.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.tolerance = config.tolerance();
        if !config.is_sync_enabled() {
            self.connectivity = Some(ConnectivityOracle::forced_offline());
        }
        self
    }

    /// Sets the account collaborator. Defaults to the SQLite account book.
    pub fn with_accounts(mut self, accounts: Arc<dyn AccountBook>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Sets the connectivity oracle. Defaults to online.
    pub fn with_connectivity(mut self, connectivity: ConnectivityOracle) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Builds the PaymentEngine.
    pub fn build(self) -> PaymentEngine {
        let accounts: Arc<dyn AccountBook> = match self.accounts {
            Some(accounts) => accounts,
            None => Arc::new(self.db.accounts()),
        };
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| ConnectivityOracle::new(true));
        let emitter: Arc<dyn SyncEventEmitter> = match self.emitter {
            Some(emitter) => emitter,
            None => Arc::new(NoOpEmitter),
        };
        let reconciler = Reconciler::new(self.db.clone(), self.tolerance);

        PaymentEngine {
            ctx: Arc::new(EngineContext {
                db: self.db,
                remote: self.remote,
                accounts,
                connectivity,
                emitter,
                reconciler,
                write_lock: Mutex::new(()),
                drain_lock: Mutex::new(()),
            }),
        }
    }
}

impl std::fmt::Debug for PaymentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentEngine")
            .field("online", &self.ctx.connectivity.is_online())
            .field("tolerance", &self.ctx.reconciler.tolerance())
            .finish()
    }
}
