//! # Merge/List Resolver
//!
//! Lists an invoice's payments without showing a logical payment twice.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  offline ─────────────► local rows, newest first                       │
//! │                                                                         │
//! │  online                                                                │
//! │    remote rows ─┐                                                      │
//! │    local rows  ─┼─► merge_payments (pure) ─► newest first              │
//! │    queued deletes┘      │                                              │
//! │                         └─► remote-only rows stored as confirmed,      │
//! │                             invoice reconciled (Observe)               │
//! │                                                                         │
//! │  remote fetch fails ──► warn, fall back to local rows                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tracing::{debug, warn};

use billbook_core::merge::{merge_payments, sort_newest_first};
use billbook_core::{Identity, Payment, StoreKind};

use crate::engine::EngineContext;
use crate::error::EngineResult;

pub(crate) struct PaymentResolver<'a> {
    ctx: &'a EngineContext,
}

impl<'a> PaymentResolver<'a> {
    pub(crate) fn new(ctx: &'a EngineContext) -> Self {
        PaymentResolver { ctx }
    }

    pub(crate) async fn list(&self, invoice_id: &Identity) -> EngineResult<Vec<Payment>> {
        let mut local = self.ctx.db.payments().list_for_invoice(invoice_id).await?;

        if !self.ctx.connectivity.is_online() {
            sort_newest_first(&mut local);
            return Ok(local);
        }

        let remote = match self.ctx.remote.list_payments(invoice_id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(invoice_id = %invoice_id, error = %e, "Remote listing failed, showing local rows");
                if e.is_retryable() {
                    self.ctx.connectivity.set_online(false);
                }
                sort_newest_first(&mut local);
                return Ok(local);
            }
        };

        // While a create for this invoice is in flight the remote copy and
        // the local copy carry different identities; storing the remote one
        // now would duplicate the row once the create is promoted.
        let in_flight = local.iter().any(|p| p.id.is_local() && !p.needs_review);

        let pending_deletes = self
            .ctx
            .db
            .sync_queue()
            .pending_delete_ids(StoreKind::Payments)
            .await?;
        let merged = merge_payments(remote, local, &pending_deletes);

        if !merged.remote_only.is_empty() && !in_flight {
            self.store_remote_rows(invoice_id, &merged.remote_only).await?;
        }

        Ok(merged.payments)
    }

    async fn store_remote_rows(&self, invoice_id: &Identity, rows: &[Payment]) -> EngineResult<()> {
        debug!(invoice_id = %invoice_id, count = rows.len(), "Storing payments recorded elsewhere");

        let payments = self.ctx.db.payments();
        for row in rows {
            payments.upsert_confirmed(row).await?;
        }

        self.ctx.reconciler.reconcile_if_known(invoice_id).await?;
        Ok(())
    }
}
