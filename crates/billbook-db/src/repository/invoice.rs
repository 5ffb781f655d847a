//! # Invoice Repository
//!
//! Local invoice snapshots: the collaborator-owned `grand_total` plus the
//! reconciler-owned derived fields.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use super::parse_identity;
use crate::error::{DbError, DbResult};
use billbook_core::{Identity, InvoiceAggregate, InvoiceSnapshot, InvoiceStatus, Money};

const TABLE: &str = "invoices";

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: String,
    party_id: String,
    grand_total: Money,
    paid_amount: Money,
    status: InvoiceStatus,
    last_payment_date: Option<NaiveDate>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for InvoiceSnapshot {
    type Error = DbError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(InvoiceSnapshot {
            id: parse_identity(TABLE, &row.id)?,
            party_id: row.party_id,
            grand_total: row.grand_total,
            paid_amount: row.paid_amount,
            status: row.status,
            last_payment_date: row.last_payment_date,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for invoice snapshot operations.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    /// Creates a new InvoiceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    /// Gets an invoice snapshot by identity.
    pub async fn get(&self, id: &Identity) -> DbResult<Option<InvoiceSnapshot>> {
        let row: Option<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT id, party_id, grand_total, paid_amount, status, last_payment_date, updated_at
            FROM invoices
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(InvoiceSnapshot::try_from).transpose()
    }

    /// Returns the snapshot, creating a pending one if none exists.
    ///
    /// An existing snapshot's `grand_total` wins over the one passed in.
    pub async fn ensure_snapshot(
        &self,
        id: &Identity,
        party_id: &str,
        grand_total: Money,
    ) -> DbResult<InvoiceSnapshot> {
        let result = sqlx::query(
            r#"
            INSERT INTO invoices (id, party_id, grand_total, paid_amount, status, updated_at)
            VALUES (?1, ?2, ?3, 0, 'pending', ?4)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(party_id)
        .bind(grand_total)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(invoice_id = %id, grand_total = %grand_total, "Created invoice snapshot");
        }

        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Invoice", id.to_string()))
    }

    /// Inserts or replaces a snapshot as provided by the invoice collaborator.
    ///
    /// Derived fields are taken as given; run the reconciler afterwards.
    pub async fn upsert(&self, snapshot: &InvoiceSnapshot) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, party_id, grand_total, paid_amount, status, last_payment_date, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                party_id = excluded.party_id,
                grand_total = excluded.grand_total,
                paid_amount = excluded.paid_amount,
                status = excluded.status,
                last_payment_date = excluded.last_payment_date,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(snapshot.id.to_string())
        .bind(&snapshot.party_id)
        .bind(snapshot.grand_total)
        .bind(snapshot.paid_amount)
        .bind(snapshot.status)
        .bind(snapshot.last_payment_date)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Writes the derived fields. Single-row, atomic.
    ///
    /// ## Returns
    /// The snapshot after the write.
    pub async fn update_aggregate(
        &self,
        id: &Identity,
        aggregate: &InvoiceAggregate,
    ) -> DbResult<InvoiceSnapshot> {
        debug!(
            invoice_id = %id,
            paid_amount = %aggregate.paid_amount,
            status = ?aggregate.status,
            "Writing invoice aggregate"
        );

        let result = sqlx::query(
            r#"
            UPDATE invoices SET
                paid_amount = ?2,
                status = ?3,
                last_payment_date = ?4,
                updated_at = ?5
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .bind(aggregate.paid_amount)
        .bind(aggregate.status)
        .bind(aggregate.last_payment_date)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Invoice", id.to_string()));
        }

        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("Invoice", id.to_string()))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use billbook_core::reconcile::{compute_aggregate, Tolerance};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_ensure_snapshot_keeps_existing_total() {
        let db = db().await;
        let id = Identity::remote("INV-1");

        let first = db
            .invoices()
            .ensure_snapshot(&id, "party-1", Money::from_minor(100_000))
            .await
            .unwrap();
        assert_eq!(first.status, InvoiceStatus::Pending);

        let second = db
            .invoices()
            .ensure_snapshot(&id, "party-1", Money::from_minor(1))
            .await
            .unwrap();
        assert_eq!(second.grand_total, Money::from_minor(100_000));
    }

    #[tokio::test]
    async fn test_update_aggregate() {
        let db = db().await;
        let id = Identity::remote("INV-1");
        db.invoices()
            .ensure_snapshot(&id, "party-1", Money::from_minor(100_000))
            .await
            .unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 4, 2);
        let aggregate = compute_aggregate(
            Money::from_minor(100_000),
            vec![(Money::from_minor(40_000), date)],
            Tolerance::default(),
        );
        let updated = db.invoices().update_aggregate(&id, &aggregate).await.unwrap();

        assert_eq!(updated.paid_amount, Money::from_minor(40_000));
        assert_eq!(updated.status, InvoiceStatus::Partial);
        assert_eq!(updated.last_payment_date, date);
    }

    #[tokio::test]
    async fn test_update_aggregate_missing_invoice() {
        let db = db().await;
        let aggregate = compute_aggregate(Money::zero(), std::iter::empty(), Tolerance::default());

        let result = db
            .invoices()
            .update_aggregate(&Identity::remote("NOPE"), &aggregate)
            .await;
        assert!(matches!(result, Err(DbError::NotFound { .. })));
    }
}
