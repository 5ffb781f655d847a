//! # Payment Repository
//!
//! Durable storage for payment rows.
//!
//! ## Payment Row Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Payment Row Lifecycle                             │
//! │                                                                         │
//! │  1. INSERT                                                             │
//! │     └── insert() → id = local:<uuid>, pending_sync = 1                 │
//! │                                                                         │
//! │  2a. PROMOTE (remote create confirmed)                                 │
//! │     └── Database::promote_created() → id = remote:<token>,             │
//! │         pending_sync = 0, synced_at = now                              │
//! │                                                                         │
//! │  2b. REJECTED                                                          │
//! │     └── flag_for_review() → needs_review = 1, review_reason = ...      │
//! │                                                                         │
//! │  3. DELETE (reversal)                                                  │
//! │     └── delete() → row gone; ledger keeps a reversal line              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use super::parse_identity;
use crate::error::DbResult;
use billbook_core::{Identity, Money, Payment, PaymentMode};

const TABLE: &str = "payments";

const SELECT_COLUMNS: &str = r#"
    SELECT id, invoice_id, party_id, amount, mode, payment_date, reference, notes,
           pending_sync, synced_at, created_at, saved_at, needs_review, review_reason
    FROM payments
"#;

/// Raw row as stored; identities are still strings.
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: String,
    invoice_id: String,
    party_id: String,
    amount: Money,
    mode: PaymentMode,
    payment_date: NaiveDate,
    reference: Option<String>,
    notes: Option<String>,
    pending_sync: bool,
    synced_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    saved_at: DateTime<Utc>,
    needs_review: bool,
    review_reason: Option<String>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = crate::error::DbError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: parse_identity(TABLE, &row.id)?,
            invoice_id: parse_identity(TABLE, &row.invoice_id)?,
            party_id: row.party_id,
            amount: row.amount,
            mode: row.mode,
            payment_date: row.payment_date,
            reference: row.reference,
            notes: row.notes,
            pending_sync: row.pending_sync,
            synced_at: row.synced_at,
            created_at: row.created_at,
            saved_at: row.saved_at,
            needs_review: row.needs_review,
            review_reason: row.review_reason,
        })
    }
}

fn convert_all(rows: Vec<PaymentRow>) -> DbResult<Vec<Payment>> {
    rows.into_iter().map(Payment::try_from).collect()
}

/// Repository for payment database operations.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Inserts a new payment row.
    ///
    /// This is the durability gate of `record_payment`: nothing remote
    /// happens unless this succeeds.
    pub async fn insert(&self, payment: &Payment) -> DbResult<()> {
        debug!(
            payment_id = %payment.id,
            invoice_id = %payment.invoice_id,
            amount = %payment.amount,
            "Inserting payment"
        );

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, invoice_id, party_id, amount, mode, payment_date, reference, notes,
                pending_sync, synced_at, created_at, saved_at, needs_review, review_reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(payment.id.to_string())
        .bind(payment.invoice_id.to_string())
        .bind(&payment.party_id)
        .bind(payment.amount)
        .bind(payment.mode)
        .bind(payment.payment_date)
        .bind(&payment.reference)
        .bind(&payment.notes)
        .bind(payment.pending_sync)
        .bind(payment.synced_at)
        .bind(payment.created_at)
        .bind(payment.saved_at)
        .bind(payment.needs_review)
        .bind(&payment.review_reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a payment by identity.
    pub async fn get(&self, id: &Identity) -> DbResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Payment::try_from).transpose()
    }

    /// Deletes a payment row.
    ///
    /// ## Returns
    /// `true` if a row was removed.
    pub async fn delete(&self, id: &Identity) -> DbResult<bool> {
        debug!(payment_id = %id, "Deleting payment");

        let result = sqlx::query("DELETE FROM payments WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists every local row for an invoice, newest first.
    pub async fn list_for_invoice(&self, invoice_id: &Identity) -> DbResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "{} WHERE invoice_id = ?1 ORDER BY payment_date DESC, created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(invoice_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    /// Marks a payment the remote store refused.
    ///
    /// ## Returns
    /// `true` if the row still existed.
    pub async fn flag_for_review(&self, id: &Identity, reason: &str) -> DbResult<bool> {
        debug!(payment_id = %id, reason = %reason, "Flagging payment for review");

        let result = sqlx::query(
            "UPDATE payments SET needs_review = 1, review_reason = ?2 WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stores a row the remote store reported, as confirmed.
    ///
    /// Used by the list resolver to mirror payments recorded on other
    /// devices. An existing row with the same id is overwritten with the
    /// remote values.
    pub async fn upsert_confirmed(&self, payment: &Payment) -> DbResult<()> {
        let now = Utc::now();
        debug!(payment_id = %payment.id, "Mirroring remote payment");

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, invoice_id, party_id, amount, mode, payment_date, reference, notes,
                pending_sync, synced_at, created_at, saved_at, needs_review, review_reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, 0, NULL)
            ON CONFLICT(id) DO UPDATE SET
                invoice_id = excluded.invoice_id,
                party_id = excluded.party_id,
                amount = excluded.amount,
                mode = excluded.mode,
                payment_date = excluded.payment_date,
                reference = excluded.reference,
                notes = excluded.notes,
                pending_sync = 0,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(payment.id.to_string())
        .bind(payment.invoice_id.to_string())
        .bind(&payment.party_id)
        .bind(payment.amount)
        .bind(payment.mode)
        .bind(payment.payment_date)
        .bind(&payment.reference)
        .bind(&payment.notes)
        .bind(payment.synced_at.unwrap_or(now))
        .bind(payment.created_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Local, unflagged rows with no queued create.
    ///
    /// A row lands here when it was saved but handing it to the queue
    /// failed afterwards. The drainer requeues these before each pass.
    pub async fn unqueued_pending(&self) -> DbResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            r#"{} WHERE pending_sync = 1
                 AND needs_review = 0
                 AND id LIKE 'local:%'
                 AND NOT EXISTS (
                     SELECT 1 FROM sync_queue q
                     WHERE q.store = 'payments'
                       AND q.operation = 'create'
                       AND q.entity_id = payments.id
                 )
               ORDER BY saved_at ASC"#,
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    /// Lists payments the remote store rejected, oldest first.
    pub async fn needing_review(&self) -> DbResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "{} WHERE needs_review = 1 ORDER BY created_at ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
