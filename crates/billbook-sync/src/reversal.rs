//! # Reversal (Delete) Path
//!
//! Removes a payment and undoes everything it caused.
//!
//! ```text
//! delete_payment(payment_id, invoice_id)
//!      │
//!      ├─► look up row ──── absent / other invoice ─► Err(PaymentNotFound)
//!      ├─► DELETE row
//!      ├─► reconcile (Observe)
//!      ├─► ledger: append payment_reversed (never delete the original)
//!      ├─► account: negative adjustment
//!      │     (skipped for a refused local row: it has none standing)
//!      ├─► remote:<token> ─► remote delete, or queue it
//!      │   local:<uuid>   ─► cancel the queued create, nothing sent
//!      └─► mirror invoice aggregate, ledger entry, adjustment
//! ```

use tracing::info;

use billbook_core::{Identity, LedgerEntryKind, StoreKind, SyncDisposition};

use crate::engine::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::mirror::{MirrorOutcome, RemoteMirror};
use crate::recorder::{adjust_account, append_ledger, mirror_side_effects};

pub(crate) struct PaymentReversal<'a> {
    ctx: &'a EngineContext,
}

impl<'a> PaymentReversal<'a> {
    pub(crate) fn new(ctx: &'a EngineContext) -> Self {
        PaymentReversal { ctx }
    }

    pub(crate) async fn delete(
        &self,
        payment_id: &Identity,
        invoice_id: &Identity,
    ) -> EngineResult<SyncDisposition> {
        let payments = self.ctx.db.payments();

        let payment = payments
            .get(payment_id)
            .await?
            .filter(|p| &p.invoice_id == invoice_id)
            .ok_or_else(|| EngineError::PaymentNotFound {
                payment_id: payment_id.to_string(),
                invoice_id: invoice_id.to_string(),
            })?;

        if !payments.delete(payment_id).await? {
            return Err(EngineError::PaymentNotFound {
                payment_id: payment_id.to_string(),
                invoice_id: invoice_id.to_string(),
            });
        }

        info!(
            payment_id = %payment_id,
            invoice_id = %invoice_id,
            amount = %payment.amount,
            "Payment deleted locally"
        );

        let invoice = self
            .ctx
            .reconciler
            .reconcile_if_known(invoice_id)
            .await?
            .map(|r| r.snapshot);

        // A refused create either never moved money or was already withdrawn.
        let (ledger, adjustment) = if payment.needs_review && payment.id.is_local() {
            (None, None)
        } else {
            let ledger = append_ledger(
                self.ctx,
                &payment,
                LedgerEntryKind::PaymentReversed,
                format!("Payment reversed ({})", payment.mode),
            )
            .await;
            let adjustment =
                adjust_account(self.ctx, &payment, -payment.amount, "Payment reversed").await;
            (ledger, adjustment)
        };

        let mut mirror = RemoteMirror::new(self.ctx);
        let outcome = mirror.delete(StoreKind::Payments, payment_id).await?;

        if let MirrorOutcome::Rejected(reason) = &outcome {
            self.ctx.emitter.emit_warning(&format!(
                "The server refused to delete payment {}: {}",
                payment_id, reason
            ));
        }

        mirror_side_effects(self.ctx, &mut mirror, invoice.as_ref(), ledger, adjustment).await;

        Ok(outcome.disposition())
    }
}
