//! # Sync Queue Drainer
//!
//! Replays queued mutations against the remote store.
//!
//! ## Drain Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Drain Pass                                     │
//! │                                                                         │
//! │  try_lock(drain_lock) ── busy ──► DrainReport { already_running }      │
//! │       │                                                                 │
//! │  offline? ── yes ──► DrainReport { skipped_offline, remaining }        │
//! │       │                                                                 │
//! │  pending local payments with no queued create ─► queue a create        │
//! │       │                                                                 │
//! │  for store in [payments, invoices, ledger_entries, account_adjustments]│
//! │    for entry in store ORDER BY seq:                                    │
//! │      create  ─► side effect of a local payment?                        │
//! │                   payment create queued ─► stop store (blocked)        │
//! │                   otherwise            ─► remove (payment never sent)  │
//! │                 remote create ─► promote + remove (one transaction)    │
//! │      update  ─► Local target? stop store (blocked)                     │
//! │                 else remote update ─► remove                           │
//! │      delete  ─► Local target? remove (nothing exists remotely)         │
//! │                 else remote delete ─► remove                           │
//! │                                                                         │
//! │      transport / timeout ─► attempts += 1, stop THIS store             │
//! │      rejected            ─► remove, flag row, reconcile, warn, next    │
//! │                             payment create: withdraw ledger + account  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each step is one statement or one transaction, so an interrupted pass
//! leaves the queue as the exact record of what remains.
//!
//! Remote calls run without the engine's write lock. Every local write that
//! depends on a row a writer may touch (promotion, rejection handling, the
//! orphan scan) takes it, so `record_payment` and `delete_payment` never see
//! a row change identity halfway through.

use serde::Serialize;
use tracing::{debug, info, warn};

use billbook_core::{StoreKind, SyncOperation, SyncQueueEntry};

use crate::engine::EngineContext;
use crate::error::{EngineResult, RemoteError};
use crate::mirror::unsynced_payment_reference;
use crate::recorder::{handle_rejected_payment, withdraw_side_effects};

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrainReport {
    /// Another pass was running; this call did nothing.
    pub already_running: bool,
    /// The oracle reported offline; nothing was attempted.
    pub skipped_offline: bool,
    /// Entries confirmed by the remote store.
    pub synced: usize,
    /// Entries the remote store refused (removed, rows flagged).
    pub rejected: usize,
    /// Entries removed without a call (nothing exists remotely).
    pub dropped: usize,
    /// Stores stopped by a transport failure.
    pub failed_stores: Vec<StoreKind>,
    /// Stores waiting on an entity that is not remote yet.
    pub blocked_stores: Vec<StoreKind>,
    /// Saved payments that had lost their queued create and got a new one.
    pub requeued: usize,
    /// Entries left in the queue after the pass.
    pub remaining: i64,
}

impl DrainReport {
    pub fn already_running() -> Self {
        DrainReport {
            already_running: true,
            ..Default::default()
        }
    }

    /// True when the queue is empty.
    pub fn is_complete(&self) -> bool {
        !self.already_running && self.remaining == 0
    }

    /// True when a retry later may make progress.
    pub fn hit_transport_failure(&self) -> bool {
        self.skipped_offline || !self.failed_stores.is_empty()
    }
}

enum Step {
    Continue,
    StopStore,
}

pub(crate) struct QueueDrainer<'a> {
    ctx: &'a EngineContext,
}

impl<'a> QueueDrainer<'a> {
    pub(crate) fn new(ctx: &'a EngineContext) -> Self {
        QueueDrainer { ctx }
    }

    pub(crate) async fn run(&self) -> EngineResult<DrainReport> {
        let Ok(_guard) = self.ctx.drain_lock.try_lock() else {
            debug!("Drain already running");
            return Ok(DrainReport::already_running());
        };

        let queue = self.ctx.db.sync_queue();
        let mut report = DrainReport::default();

        if !self.ctx.connectivity.is_online() {
            report.skipped_offline = true;
            report.remaining = queue.count_pending().await?;
            debug!(remaining = report.remaining, "Offline, skipping drain");
            return Ok(report);
        }

        report.requeued = self.requeue_orphans().await?;

        for store in StoreKind::ALL {
            self.drain_store(store, &mut report).await?;
        }

        report.remaining = queue.count_pending().await?;

        if report.synced + report.rejected + report.dropped > 0 || report.remaining > 0 {
            info!(
                synced = report.synced,
                rejected = report.rejected,
                dropped = report.dropped,
                remaining = report.remaining,
                failed_stores = ?report.failed_stores,
                blocked_stores = ?report.blocked_stores,
                "Drain pass finished"
            );
        }
        self.ctx
            .emitter
            .emit_progress(report.remaining, report.synced as i64);

        Ok(report)
    }

    /// Queues a create for every pending local payment that has none.
    ///
    /// ## When This Occurs
    /// - A live create reached the server but the promotion and the fallback
    ///   enqueue both failed
    /// - The process died between the local insert and the enqueue
    async fn requeue_orphans(&self) -> EngineResult<usize> {
        let _writer = self.ctx.write_lock.lock().await;
        let orphans = self.ctx.db.payments().unqueued_pending().await?;

        for payment in &orphans {
            let payload = serde_json::to_string(payment)?;
            self.ctx
                .db
                .sync_queue()
                .enqueue(SyncOperation::Create, StoreKind::Payments, &payment.id, &payload)
                .await?;
            warn!(payment_id = %payment.id, "Pending payment had no queued create, requeued");
        }

        Ok(orphans.len())
    }

    async fn drain_store(&self, store: StoreKind, report: &mut DrainReport) -> EngineResult<()> {
        let queue = self.ctx.db.sync_queue();
        let mut after_seq = 0;

        while let Some(entry) = queue.next_for_store(store, after_seq).await? {
            after_seq = entry.seq;
            match self.replay(&entry, report).await? {
                Step::Continue => {}
                Step::StopStore => break,
            }
        }

        Ok(())
    }

    async fn replay(&self, entry: &SyncQueueEntry, report: &mut DrainReport) -> EngineResult<Step> {
        let queue = self.ctx.db.sync_queue();
        let remote = &self.ctx.remote;
        let store = entry.store;
        let id = &entry.entity_id;

        debug!(
            seq = entry.seq,
            operation = %entry.operation,
            store = %store,
            entity_id = %id,
            attempts = entry.attempts,
            "Replaying queued entry"
        );

        match entry.operation {
            SyncOperation::Create => {
                if !id.is_local() {
                    // Already promoted by an earlier, interrupted pass.
                    queue.remove(&entry.id).await?;
                    report.dropped += 1;
                    return Ok(Step::Continue);
                }

                if let Some(payment_id) = unsynced_payment_reference(store, &entry.payload) {
                    if self
                        .ctx
                        .db
                        .sync_queue()
                        .has_queued_create(StoreKind::Payments, &payment_id)
                        .await?
                    {
                        debug!(store = %store, entity_id = %id, payment_id = %payment_id, "Waiting for payment create");
                        report.blocked_stores.push(store);
                        return Ok(Step::StopStore);
                    }

                    // Cancelled or rejected: the payment will never exist remotely.
                    debug!(store = %store, entity_id = %id, payment_id = %payment_id, "Payment never reached the server, dropping");
                    queue.remove(&entry.id).await?;
                    report.dropped += 1;
                    return Ok(Step::Continue);
                }

                match remote.create(store, id, &entry.payload).await {
                    Ok(remote_id) => {
                        let _writer = self.ctx.write_lock.lock().await;
                        self.ctx
                            .db
                            .promote_created(store, id, &remote_id, Some(&entry.id))
                            .await?;
                        report.synced += 1;
                        Ok(Step::Continue)
                    }
                    Err(e) => self.fail(entry, e, report).await,
                }
            }

            SyncOperation::Update => {
                if !id.is_remote_addressable() {
                    debug!(store = %store, entity_id = %id, "Update target not created remotely yet");
                    report.blocked_stores.push(store);
                    return Ok(Step::StopStore);
                }

                match remote.update(store, id, &entry.payload).await {
                    Ok(()) => {
                        queue.remove(&entry.id).await?;
                        report.synced += 1;
                        Ok(Step::Continue)
                    }
                    Err(e) => self.fail(entry, e, report).await,
                }
            }

            SyncOperation::Delete => {
                if !id.is_remote_addressable() {
                    queue.remove(&entry.id).await?;
                    report.dropped += 1;
                    return Ok(Step::Continue);
                }

                match remote.delete(store, id).await {
                    Ok(()) => {
                        queue.remove(&entry.id).await?;
                        report.synced += 1;
                        Ok(Step::Continue)
                    }
                    Err(e) => self.fail(entry, e, report).await,
                }
            }
        }
    }

    async fn fail(
        &self,
        entry: &SyncQueueEntry,
        err: RemoteError,
        report: &mut DrainReport,
    ) -> EngineResult<Step> {
        let queue = self.ctx.db.sync_queue();

        if let RemoteError::Rejected { status, reason } = err {
            warn!(
                seq = entry.seq,
                operation = %entry.operation,
                store = %entry.store,
                entity_id = %entry.entity_id,
                status,
                reason = %reason,
                "Queued mutation rejected by remote store"
            );
            queue.remove(&entry.id).await?;
            report.rejected += 1;
            self.handle_rejection(entry, &reason).await?;
            return Ok(Step::Continue);
        }

        warn!(
            seq = entry.seq,
            store = %entry.store,
            entity_id = %entry.entity_id,
            error = %err,
            "Transport failure, stopping store for this pass"
        );
        queue.mark_failed(&entry.id, &err.to_string()).await?;
        report.failed_stores.push(entry.store);
        Ok(Step::StopStore)
    }

    async fn handle_rejection(&self, entry: &SyncQueueEntry, reason: &str) -> EngineResult<()> {
        let is_payment_write = entry.store == StoreKind::Payments
            && matches!(entry.operation, SyncOperation::Create | SyncOperation::Update);

        if is_payment_write {
            let _writer = self.ctx.write_lock.lock().await;
            if let Some(payment) = self.ctx.db.payments().get(&entry.entity_id).await? {
                handle_rejected_payment(self.ctx, &payment, reason).await?;
                if entry.operation == SyncOperation::Create {
                    withdraw_side_effects(self.ctx, &payment).await;
                }
                return Ok(());
            }
        }

        self.ctx.emitter.emit_warning(&format!(
            "The server refused to {} {} {}: {}",
            entry.operation, entry.store, entry.entity_id, reason
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_flags() {
        let busy = DrainReport::already_running();
        assert!(busy.already_running);
        assert!(!busy.is_complete());

        let offline = DrainReport {
            skipped_offline: true,
            remaining: 3,
            ..Default::default()
        };
        assert!(offline.hit_transport_failure());
        assert!(!offline.is_complete());

        assert!(DrainReport::default().is_complete());
    }
}
