//! # Payment Recorder
//!
//! Records a payment against an invoice. The row is durable before anything
//! touches the network.
//!
//! ## Record Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  record_payment(input)                                                 │
//! │                                                                         │
//! │  1. validate ───────────────────────────── fail ─► Err(Invalid)        │
//! │  2. INSERT payment (local:<uuid>, pending) ─ fail ─► Err(Storage)      │
//! │  3. ensure invoice snapshot                                            │
//! │  4. reconcile (Enforce) ─────────── overpaid ─► DELETE row,            │
//! │                                                 Err(Overpayment)       │
//! │  5. mirror payment create                                              │
//! │       Synced   ─► row promoted to remote:<token>                       │
//! │       Queued   ─► create waits in sync_queue                           │
//! │       Rejected ─► row flagged, invoice re-reconciled, warning          │
//! │  6. ledger entry + account adjustment (best effort, skipped when      │
//! │     Rejected), pointing at the id from step 5                          │
//! │  7. mirror invoice aggregate, ledger entry, adjustment                 │
//! │  8. RecordOutcome { payment, disposition, invoice }                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Once step 2 commits the payment is saved and the call returns `Ok`. A
//! local failure after that point is logged and leaves the payment pending;
//! the next drain pass picks it up.

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use billbook_core::validation::validate_payment_input;
use billbook_core::{
    AccountAdjustment, GuardMode, Identity, InvoiceSnapshot, LedgerEntry, LedgerEntryKind, Money,
    Payment, PaymentInput, StoreKind, SyncDisposition,
};

use crate::engine::EngineContext;
use crate::error::EngineResult;
use crate::mirror::{MirrorOutcome, RemoteMirror};
use crate::reconciler::Reconciliation;

/// What `record_payment` did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOutcome {
    /// The stored row (promoted to a remote identity when `Synced`).
    pub payment: Payment,
    pub disposition: SyncDisposition,
    /// The invoice snapshot after reconciliation.
    pub invoice: InvoiceSnapshot,
}

pub(crate) struct PaymentRecorder<'a> {
    ctx: &'a EngineContext,
}

impl<'a> PaymentRecorder<'a> {
    pub(crate) fn new(ctx: &'a EngineContext) -> Self {
        PaymentRecorder { ctx }
    }

    pub(crate) async fn record(&self, input: PaymentInput) -> EngineResult<RecordOutcome> {
        validate_payment_input(&input)?;

        let payment = Payment::from_input(&input, Utc::now());
        let payload = serde_json::to_string(&payment)?;
        self.ctx.db.payments().insert(&payment).await?;

        info!(
            payment_id = %payment.id,
            invoice_id = %payment.invoice_id,
            amount = %payment.amount,
            mode = %payment.mode,
            "Payment saved locally"
        );

        let reconciliation = match self.guard(&payment, &input).await {
            Ok(reconciliation) => reconciliation,
            Err(e) => {
                self.roll_back(&payment).await;
                return Err(e);
            }
        };

        let mut mirror = RemoteMirror::new(self.ctx);
        let outcome = match mirror.create(StoreKind::Payments, &payment.id, &payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(payment_id = %payment.id, error = %e, "Payment saved but not mirrored, leaving it pending");
                mirror.degrade();
                MirrorOutcome::Queued
            }
        };

        let (payment, invoice) = match &outcome {
            MirrorOutcome::Synced(remote_id) => {
                let promoted = match self.ctx.db.payments().get(remote_id).await {
                    Ok(Some(promoted)) => promoted,
                    Ok(None) => promoted_copy(&payment, remote_id),
                    Err(e) => {
                        warn!(payment_id = %remote_id, error = %e, "Failed to reload promoted payment");
                        promoted_copy(&payment, remote_id)
                    }
                };
                (promoted, reconciliation.snapshot)
            }
            MirrorOutcome::Rejected(reason) => {
                let invoice = match handle_rejected_payment(self.ctx, &payment, reason).await {
                    Ok(invoice) => invoice,
                    Err(e) => {
                        error!(payment_id = %payment.id, error = %e, "Failed to flag rejected payment");
                        None
                    }
                };
                let flagged = Payment {
                    needs_review: true,
                    review_reason: Some(reason.clone()),
                    ..payment
                };
                (flagged, invoice.unwrap_or(reconciliation.snapshot))
            }
            MirrorOutcome::Queued | MirrorOutcome::NotNeeded => (payment, reconciliation.snapshot),
        };

        // A refused payment moves no money.
        let (ledger, adjustment) = if matches!(outcome, MirrorOutcome::Rejected(_)) {
            (None, None)
        } else {
            let ledger = append_ledger(
                self.ctx,
                &payment,
                LedgerEntryKind::PaymentReceived,
                format!("Payment received via {}", payment.mode),
            )
            .await;
            let adjustment = adjust_account(self.ctx, &payment, payment.amount, "Payment received").await;
            (ledger, adjustment)
        };

        mirror_side_effects(self.ctx, &mut mirror, Some(&invoice), ledger, adjustment).await;

        Ok(RecordOutcome {
            payment,
            disposition: outcome.disposition(),
            invoice,
        })
    }

    /// Snapshot + overpayment guard for the row just inserted.
    async fn guard(&self, payment: &Payment, input: &PaymentInput) -> EngineResult<Reconciliation> {
        self.ctx
            .db
            .invoices()
            .ensure_snapshot(&payment.invoice_id, &payment.party_id, input.grand_total)
            .await?;

        self.ctx
            .reconciler
            .reconcile(&payment.invoice_id, GuardMode::Enforce)
            .await
    }

    async fn roll_back(&self, payment: &Payment) {
        warn!(payment_id = %payment.id, "Rolling back tentative payment");
        if let Err(e) = self.ctx.db.payments().delete(&payment.id).await {
            error!(payment_id = %payment.id, error = %e, "Failed to roll back tentative payment");
        }
    }
}

// =============================================================================
// Side Effects (shared with the reversal path)
// =============================================================================

/// Appends a journal line for `payment`. Failures are logged, never fatal.
pub(crate) async fn append_ledger(
    ctx: &EngineContext,
    payment: &Payment,
    kind: LedgerEntryKind,
    memo: String,
) -> Option<LedgerEntry> {
    let entry = LedgerEntry {
        id: Identity::new_local(),
        party_id: payment.party_id.clone(),
        invoice_id: payment.invoice_id.clone(),
        payment_id: payment.id.clone(),
        kind,
        amount: payment.amount,
        memo,
        entry_date: payment.payment_date,
        pending_sync: true,
        created_at: Utc::now(),
    };

    match ctx.db.ledger().append(&entry).await {
        Ok(()) => Some(entry),
        Err(e) => {
            warn!(payment_id = %payment.id, error = %e, "Failed to append ledger entry");
            None
        }
    }
}

/// Moves the account the payment mode settles into. Cheques move nothing
/// until cleared. Failures are logged, never fatal.
pub(crate) async fn adjust_account(
    ctx: &EngineContext,
    payment: &Payment,
    delta: Money,
    memo: &str,
) -> Option<AccountAdjustment> {
    let account = payment.mode.account()?;

    match ctx
        .accounts
        .adjust(account, delta, memo, Some(&payment.id))
        .await
    {
        Ok(adjustment) => Some(adjustment),
        Err(e) => {
            warn!(payment_id = %payment.id, account = %account, error = %e, "Failed to adjust account");
            None
        }
    }
}

/// The row as the promotion left it, for when it cannot be read back.
fn promoted_copy(payment: &Payment, remote_id: &Identity) -> Payment {
    Payment {
        id: remote_id.clone(),
        pending_sync: false,
        synced_at: Some(Utc::now()),
        ..payment.clone()
    }
}

/// Undoes the ledger line and account movement of a payment the server
/// refused after it had been queued. Local only: the originals never reach
/// the remote store, so neither do these.
///
/// A payment whose received line was never written is left alone.
pub(crate) async fn withdraw_side_effects(ctx: &EngineContext, payment: &Payment) {
    let received = match ctx.db.ledger().list_for_payment(&payment.id).await {
        Ok(entries) => entries
            .iter()
            .any(|e| e.kind == LedgerEntryKind::PaymentReceived),
        Err(e) => {
            warn!(payment_id = %payment.id, error = %e, "Failed to read ledger, not withdrawing");
            return;
        }
    };
    if !received {
        return;
    }

    append_ledger(
        ctx,
        payment,
        LedgerEntryKind::PaymentReversed,
        format!("Payment refused by server ({})", payment.mode),
    )
    .await;
    adjust_account(ctx, payment, -payment.amount, "Payment refused by server").await;
}

/// Flags a refused payment, re-reconciles its invoice and tells the user.
///
/// ## Returns
/// The invoice snapshot after reconciliation, if the invoice is known.
pub(crate) async fn handle_rejected_payment(
    ctx: &EngineContext,
    payment: &Payment,
    reason: &str,
) -> EngineResult<Option<InvoiceSnapshot>> {
    ctx.db.payments().flag_for_review(&payment.id, reason).await?;
    let reconciliation = ctx.reconciler.reconcile_if_known(&payment.invoice_id).await?;

    ctx.emitter.emit_warning(&format!(
        "Payment of {} on invoice {} was rejected by the server: {}",
        payment.amount, payment.invoice_id, reason
    ));

    Ok(reconciliation.map(|r| r.snapshot))
}

/// Mirrors invoice aggregate, ledger entry and account adjustment, in that
/// order. Nothing here is fatal: a local failure is logged and the row stays
/// pending.
pub(crate) async fn mirror_side_effects(
    ctx: &EngineContext,
    mirror: &mut RemoteMirror<'_>,
    invoice: Option<&InvoiceSnapshot>,
    ledger: Option<LedgerEntry>,
    adjustment: Option<AccountAdjustment>,
) {
    if let Some(invoice) = invoice {
        match serde_json::to_string(invoice) {
            Ok(payload) => {
                let result = mirror.update(StoreKind::Invoices, &invoice.id, &payload).await;
                report(ctx, StoreKind::Invoices, &invoice.id, result);
            }
            Err(e) => warn!(invoice_id = %invoice.id, error = %e, "Failed to serialize invoice"),
        }
    }

    if let Some(entry) = ledger {
        match serde_json::to_string(&entry) {
            Ok(payload) => {
                let result = mirror.create(StoreKind::LedgerEntries, &entry.id, &payload).await;
                report(ctx, StoreKind::LedgerEntries, &entry.id, result);
            }
            Err(e) => warn!(entry_id = %entry.id, error = %e, "Failed to serialize ledger entry"),
        }
    }

    if let Some(adjustment) = adjustment {
        match serde_json::to_string(&adjustment) {
            Ok(payload) => {
                let result = mirror
                    .create(StoreKind::AccountAdjustments, &adjustment.id, &payload)
                    .await;
                report(ctx, StoreKind::AccountAdjustments, &adjustment.id, result);
            }
            Err(e) => warn!(adjustment_id = %adjustment.id, error = %e, "Failed to serialize adjustment"),
        }
    }
}

fn report(
    ctx: &EngineContext,
    store: StoreKind,
    entity_id: &Identity,
    result: EngineResult<MirrorOutcome>,
) {
    match result {
        Ok(MirrorOutcome::Rejected(reason)) => {
            ctx.emitter.emit_warning(&format!(
                "The server refused {} {}: {}",
                store, entity_id, reason
            ));
        }
        Ok(_) => {}
        Err(e) => {
            error!(store = %store, entity_id = %entity_id, error = %e, "Failed to mirror side effect");
        }
    }
}
