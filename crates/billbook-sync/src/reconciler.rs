//! # Invoice Reconciler
//!
//! Recomputes an invoice's derived fields from its payment rows and writes
//! them back. The only writer of `paid_amount`, `status` and
//! `last_payment_date`.
//!
//! ## Flow
//! ```text
//! reconcile(invoice_id, mode)
//!      │
//!      ├─► load snapshot (grand_total)
//!      ├─► load payment rows, skip rows flagged for review
//!      ├─► compute_aggregate (pure, billbook-core)
//!      │
//!      ├─► overpaid?
//!      │     Enforce ─► Err(Overpayment), nothing written
//!      │     Observe ─► warn, continue
//!      │
//!      └─► stored fields differ? ─► UPDATE invoices (single row)
//!                          same? ─► no write
//! ```

use tracing::{debug, warn};

use billbook_core::reconcile::compute_aggregate;
use billbook_core::{GuardMode, Identity, InvoiceAggregate, InvoiceSnapshot, Tolerance};
use billbook_db::{Database, DbError};

use crate::error::{EngineError, EngineResult};

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// The snapshot as stored after the call.
    pub snapshot: InvoiceSnapshot,
    pub aggregate: InvoiceAggregate,
    /// Whether the stored fields were rewritten.
    pub changed: bool,
}

/// Keeps invoice aggregates equal to the sum of their payments.
#[derive(Debug, Clone)]
pub struct Reconciler {
    db: Database,
    tolerance: Tolerance,
}

impl Reconciler {
    pub fn new(db: Database, tolerance: Tolerance) -> Self {
        Reconciler { db, tolerance }
    }

    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Recomputes and, if needed, writes the aggregate of one invoice.
    ///
    /// ## Errors
    /// - `Storage(NotFound)` when there is no local snapshot
    /// - `Overpayment` in [`GuardMode::Enforce`] when the guard trips
    pub async fn reconcile(
        &self,
        invoice_id: &Identity,
        mode: GuardMode,
    ) -> EngineResult<Reconciliation> {
        let snapshot = self
            .db
            .invoices()
            .get(invoice_id)
            .await?
            .ok_or_else(|| DbError::not_found("Invoice", invoice_id.to_string()))?;

        let payments = self.db.payments().list_for_invoice(invoice_id).await?;
        let aggregate = compute_aggregate(
            snapshot.grand_total,
            payments
                .iter()
                .filter(|p| !p.needs_review)
                .map(|p| (p.amount, Some(p.payment_date))),
            self.tolerance,
        );

        if aggregate.is_overpaid() {
            match mode {
                GuardMode::Enforce => {
                    aggregate.ensure_within_total(invoice_id)?;
                }
                GuardMode::Observe => {
                    warn!(
                        invoice_id = %invoice_id,
                        paid = %aggregate.paid_amount,
                        grand_total = %aggregate.grand_total,
                        excess = %aggregate.excess,
                        "Invoice is over-paid beyond tolerance"
                    );
                }
            }
        }

        if aggregate.matches(snapshot.paid_amount, snapshot.status, snapshot.last_payment_date) {
            debug!(invoice_id = %invoice_id, "Invoice aggregate unchanged");
            return Ok(Reconciliation {
                snapshot,
                aggregate,
                changed: false,
            });
        }

        let snapshot = self
            .db
            .invoices()
            .update_aggregate(invoice_id, &aggregate)
            .await?;

        Ok(Reconciliation {
            snapshot,
            aggregate,
            changed: true,
        })
    }

    /// Like [`Reconciler::reconcile`] in Observe mode, but an invoice with no
    /// local snapshot is not an error.
    pub async fn reconcile_if_known(
        &self,
        invoice_id: &Identity,
    ) -> EngineResult<Option<Reconciliation>> {
        match self.reconcile(invoice_id, GuardMode::Observe).await {
            Ok(reconciliation) => Ok(Some(reconciliation)),
            Err(EngineError::Storage(DbError::NotFound { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billbook_core::{InvoiceStatus, Money, Payment, PaymentInput, PaymentMode};
    use chrono::{NaiveDate, Utc};

    async fn setup(grand_total: i64) -> (Database, Reconciler, Identity) {
        let db = Database::new(billbook_db::DbConfig::in_memory()).await.unwrap();
        let invoice_id = Identity::remote("INV-1");
        db.invoices()
            .ensure_snapshot(&invoice_id, "party-1", Money::from_minor(grand_total))
            .await
            .unwrap();
        let reconciler = Reconciler::new(db.clone(), Tolerance::default());
        (db, reconciler, invoice_id)
    }

    async fn pay(db: &Database, invoice_id: &Identity, amount: i64, day: u32) -> Payment {
        let input = PaymentInput {
            invoice_id: invoice_id.clone(),
            party_id: "party-1".into(),
            amount: Money::from_minor(amount),
            mode: PaymentMode::Cash,
            payment_date: NaiveDate::from_ymd_opt(2024, 7, day).unwrap(),
            reference: None,
            notes: None,
            grand_total: Money::zero(),
        };
        let payment = Payment::from_input(&input, Utc::now());
        db.payments().insert(&payment).await.unwrap();
        payment
    }

    #[tokio::test]
    async fn test_second_call_writes_nothing() {
        let (db, reconciler, invoice_id) = setup(100_000).await;
        pay(&db, &invoice_id, 40_000, 3).await;

        let first = reconciler.reconcile(&invoice_id, GuardMode::Enforce).await.unwrap();
        assert!(first.changed);
        assert_eq!(first.snapshot.status, InvoiceStatus::Partial);
        assert_eq!(first.snapshot.paid_amount, Money::from_minor(40_000));

        let second = reconciler.reconcile(&invoice_id, GuardMode::Enforce).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.snapshot, first.snapshot);
    }

    #[tokio::test]
    async fn test_enforce_rejects_without_writing() {
        let (db, reconciler, invoice_id) = setup(100_000).await;
        pay(&db, &invoice_id, 90_000, 1).await;
        reconciler.reconcile(&invoice_id, GuardMode::Enforce).await.unwrap();
        pay(&db, &invoice_id, 15_000, 2).await;

        let err = reconciler
            .reconcile(&invoice_id, GuardMode::Enforce)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Overpayment(_)));

        let stored = db.invoices().get(&invoice_id).await.unwrap().unwrap();
        assert_eq!(stored.paid_amount, Money::from_minor(90_000));
    }

    #[tokio::test]
    async fn test_observe_writes_overpaid_aggregate() {
        let (db, reconciler, invoice_id) = setup(100_000).await;
        pay(&db, &invoice_id, 90_000, 1).await;
        pay(&db, &invoice_id, 15_000, 2).await;

        let result = reconciler.reconcile(&invoice_id, GuardMode::Observe).await.unwrap();
        assert!(result.aggregate.is_overpaid());
        assert_eq!(result.snapshot.status, InvoiceStatus::Paid);
        assert_eq!(result.snapshot.paid_amount, Money::from_minor(105_000));
        assert_eq!(
            result.snapshot.last_payment_date,
            NaiveDate::from_ymd_opt(2024, 7, 2)
        );
    }

    #[tokio::test]
    async fn test_flagged_rows_are_not_counted() {
        let (db, reconciler, invoice_id) = setup(100_000).await;
        pay(&db, &invoice_id, 30_000, 1).await;
        let refused = pay(&db, &invoice_id, 20_000, 2).await;
        db.payments()
            .flag_for_review(&refused.id, "rejected")
            .await
            .unwrap();

        let result = reconciler.reconcile(&invoice_id, GuardMode::Observe).await.unwrap();
        assert_eq!(result.snapshot.paid_amount, Money::from_minor(30_000));
        assert_eq!(result.aggregate.payment_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_invoice() {
        let (_db, reconciler, _) = setup(100).await;
        let missing = Identity::remote("INV-404");

        assert!(reconciler.reconcile_if_known(&missing).await.unwrap().is_none());
        assert!(matches!(
            reconciler.reconcile(&missing, GuardMode::Observe).await,
            Err(EngineError::Storage(DbError::NotFound { .. }))
        ));
    }
}
