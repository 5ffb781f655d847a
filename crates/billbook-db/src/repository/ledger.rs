//! # Ledger Repository
//!
//! Append-only party journal. Rows are inserted and, after a confirmed
//! remote create, re-keyed; they are never deleted.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use super::parse_identity;
use crate::error::{DbError, DbResult};
use billbook_core::{Identity, LedgerEntry, LedgerEntryKind, Money};

const TABLE: &str = "ledger_entries";

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: String,
    party_id: String,
    invoice_id: String,
    payment_id: String,
    kind: LedgerEntryKind,
    amount: Money,
    memo: String,
    entry_date: NaiveDate,
    pending_sync: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = DbError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: parse_identity(TABLE, &row.id)?,
            party_id: row.party_id,
            invoice_id: parse_identity(TABLE, &row.invoice_id)?,
            payment_id: parse_identity(TABLE, &row.payment_id)?,
            kind: row.kind,
            amount: row.amount,
            memo: row.memo,
            entry_date: row.entry_date,
            pending_sync: row.pending_sync,
            created_at: row.created_at,
        })
    }
}

/// Repository for the party ledger.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Appends a journal line.
    pub async fn append(&self, entry: &LedgerEntry) -> DbResult<()> {
        debug!(
            entry_id = %entry.id,
            payment_id = %entry.payment_id,
            kind = ?entry.kind,
            "Appending ledger entry"
        );

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, party_id, invoice_id, payment_id, kind, amount, memo,
                entry_date, pending_sync, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.party_id)
        .bind(entry.invoice_id.to_string())
        .bind(entry.payment_id.to_string())
        .bind(entry.kind)
        .bind(entry.amount)
        .bind(&entry.memo)
        .bind(entry.entry_date)
        .bind(entry.pending_sync)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Journal lines for a party, oldest first.
    pub async fn list_for_party(&self, party_id: &str) -> DbResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            r#"
            SELECT id, party_id, invoice_id, payment_id, kind, amount, memo,
                   entry_date, pending_sync, created_at
            FROM ledger_entries
            WHERE party_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(party_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    /// Journal lines referring to one payment, oldest first.
    pub async fn list_for_payment(&self, payment_id: &Identity) -> DbResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            r#"
            SELECT id, party_id, invoice_id, payment_id, kind, amount, memo,
                   entry_date, pending_sync, created_at
            FROM ledger_entries
            WHERE payment_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(payment_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn entry(payment_id: &Identity, kind: LedgerEntryKind) -> LedgerEntry {
        LedgerEntry {
            id: Identity::new_local(),
            party_id: "party-1".to_string(),
            invoice_id: Identity::remote("INV-1"),
            payment_id: payment_id.clone(),
            kind,
            amount: Money::from_minor(5_000),
            memo: "Payment".to_string(),
            entry_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            pending_sync: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_reversal_appends_rather_than_deletes() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let payment_id = Identity::new_local();

        db.ledger()
            .append(&entry(&payment_id, LedgerEntryKind::PaymentReceived))
            .await
            .unwrap();
        db.ledger()
            .append(&entry(&payment_id, LedgerEntryKind::PaymentReversed))
            .await
            .unwrap();

        let lines = db.ledger().list_for_payment(&payment_id).await.unwrap();
        let kinds: Vec<_> = lines.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![LedgerEntryKind::PaymentReceived, LedgerEntryKind::PaymentReversed]
        );
        assert_eq!(db.ledger().list_for_party("party-1").await.unwrap().len(), 2);
    }
}
