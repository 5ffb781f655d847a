//! # Sync Queue Repository
//!
//! The durable FIFO of remote mutations that have not been confirmed yet.
//!
//! ## The Queue Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Sync Queue Lifecycle                                 │
//! │                                                                         │
//! │  LOCAL WRITE (record_payment, delete_payment, ...)                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  remote call failed / offline / store has older entries                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT INTO sync_queue (operation, store, entity_id, payload)         │
//! │       │            seq = AUTOINCREMENT (FIFO key)                      │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            DRAINER (billbook-sync::drain)                       │   │
//! │  │                                                                 │   │
//! │  │  per store: SELECT ... WHERE store = ? ORDER BY seq LIMIT 1    │   │
//! │  │     a. confirmed   → DELETE (inside the promotion transaction) │   │
//! │  │     b. transport   → attempts += 1, last_error = ?; stop store │   │
//! │  │     c. rejected    → DELETE, flag row for review               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • Entries are never dropped silently                                  │
//! │  • A crash at any point leaves the queue as the record of what remains │
//! │  • Ordering holds per store, not globally                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::parse_identity;
use crate::error::{DbError, DbResult};
use billbook_core::{Identity, StoreKind, SyncOperation, SyncQueueEntry};

const TABLE: &str = "sync_queue";

const SELECT_COLUMNS: &str = r#"
    SELECT seq, id, operation, store, entity_id, payload, enqueued_at,
           attempts, last_error, attempted_at
    FROM sync_queue
"#;

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    seq: i64,
    id: String,
    operation: SyncOperation,
    store: StoreKind,
    entity_id: String,
    payload: String,
    enqueued_at: DateTime<Utc>,
    attempts: i64,
    last_error: Option<String>,
    attempted_at: Option<DateTime<Utc>>,
}

impl TryFrom<QueueRow> for SyncQueueEntry {
    type Error = DbError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(SyncQueueEntry {
            id: row.id,
            seq: row.seq,
            operation: row.operation,
            store: row.store,
            entity_id: parse_identity(TABLE, &row.entity_id)?,
            payload: row.payload,
            enqueued_at: row.enqueued_at,
            attempts: row.attempts,
            last_error: row.last_error,
            attempted_at: row.attempted_at,
        })
    }
}

/// Appends one entry using any executor (pool or open transaction).
pub(crate) async fn insert_entry<'e, E>(
    executor: E,
    operation: SyncOperation,
    store: StoreKind,
    entity_id: &Identity,
    payload: &str,
) -> DbResult<SyncQueueEntry>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let seq: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO sync_queue (id, operation, store, entity_id, payload, enqueued_at, attempts)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
        RETURNING seq
        "#,
    )
    .bind(&id)
    .bind(operation)
    .bind(store)
    .bind(entity_id.to_string())
    .bind(payload)
    .bind(now)
    .fetch_one(executor)
    .await?;

    debug!(
        seq = seq,
        operation = %operation,
        store = %store,
        entity_id = %entity_id,
        "Enqueued sync entry"
    );

    Ok(SyncQueueEntry {
        id,
        seq,
        operation,
        store,
        entity_id: entity_id.clone(),
        payload: payload.to_string(),
        enqueued_at: now,
        attempts: 0,
        last_error: None,
        attempted_at: None,
    })
}

/// Repository for sync queue operations.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    pool: SqlitePool,
}

impl SyncQueueRepository {
    /// Creates a new SyncQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncQueueRepository { pool }
    }

    /// Durably appends a mutation. Single-row INSERT; never drops.
    pub async fn enqueue(
        &self,
        operation: SyncOperation,
        store: StoreKind,
        entity_id: &Identity,
        payload: &str,
    ) -> DbResult<SyncQueueEntry> {
        insert_entry(&self.pool, operation, store, entity_id, payload).await
    }

    /// Oldest entry of `store` with `seq > after_seq`.
    pub async fn next_for_store(
        &self,
        store: StoreKind,
        after_seq: i64,
    ) -> DbResult<Option<SyncQueueEntry>> {
        let row: Option<QueueRow> = sqlx::query_as(&format!(
            "{} WHERE store = ?1 AND seq > ?2 ORDER BY seq ASC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(store)
        .bind(after_seq)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncQueueEntry::try_from).transpose()
    }

    /// Every entry, oldest first.
    pub async fn list_all(&self) -> DbResult<Vec<SyncQueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!("{} ORDER BY seq ASC", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(SyncQueueEntry::try_from).collect()
    }

    /// Whether `store` has anything queued.
    ///
    /// A direct remote attempt is only allowed when this is false, otherwise
    /// the new mutation would overtake older ones.
    pub async fn has_pending(&self, store: StoreKind) -> DbResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sync_queue WHERE store = ?1)")
                .bind(store)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    /// Whether a create for `entity_id` is still waiting in `store`.
    ///
    /// Rows that reference a local identity can only be sent once this
    /// turns false.
    pub async fn has_queued_create(&self, store: StoreKind, entity_id: &Identity) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sync_queue
                WHERE store = ?1 AND operation = 'create' AND entity_id = ?2
            )
            "#,
        )
        .bind(store)
        .bind(entity_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Removes an entry after confirmation or rejection.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a transport failure.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_queue SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Removes every entry targeting `entity_id`.
    ///
    /// Used by the reversal path when a never-synced row is deleted.
    ///
    /// ## Returns
    /// Number of cancelled entries.
    pub async fn cancel_for_entity(&self, entity_id: &Identity) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE entity_id = ?1")
            .bind(entity_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            debug!(
                entity_id = %entity_id,
                cancelled = result.rows_affected(),
                "Cancelled queued entries"
            );
        }

        Ok(result.rows_affected())
    }

    /// Entity ids of `store` with a queued delete.
    pub async fn pending_delete_ids(&self, store: StoreKind) -> DbResult<HashSet<Identity>> {
        let raw: Vec<String> = sqlx::query_scalar(
            "SELECT entity_id FROM sync_queue WHERE store = ?1 AND operation = 'delete'",
        )
        .bind(store)
        .fetch_all(&self.pool)
        .await?;

        raw.iter().map(|s| parse_identity(TABLE, s)).collect()
    }

    /// Counts queued entries across all stores.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Counts queued entries for one store.
    pub async fn count_for_store(&self, store: StoreKind) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE store = ?1")
            .bind(store)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_fifo_per_store() {
        let db = db().await;
        let queue = db.sync_queue();
        let a = Identity::new_local();
        let b = Identity::new_local();

        let first = queue
            .enqueue(SyncOperation::Create, StoreKind::Payments, &a, "{}")
            .await
            .unwrap();
        queue
            .enqueue(SyncOperation::Update, StoreKind::Invoices, &b, "{}")
            .await
            .unwrap();
        let third = queue
            .enqueue(SyncOperation::Delete, StoreKind::Payments, &a, "{}")
            .await
            .unwrap();

        let head = queue.next_for_store(StoreKind::Payments, 0).await.unwrap().unwrap();
        assert_eq!(head.id, first.id);

        let next = queue
            .next_for_store(StoreKind::Payments, head.seq)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, third.id);
        assert!(queue
            .next_for_store(StoreKind::Payments, next.seq)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_seq_is_monotonic_after_removal() {
        let db = db().await;
        let queue = db.sync_queue();
        let id = Identity::new_local();

        let first = queue
            .enqueue(SyncOperation::Create, StoreKind::Payments, &id, "{}")
            .await
            .unwrap();
        queue.remove(&first.id).await.unwrap();
        let second = queue
            .enqueue(SyncOperation::Create, StoreKind::Payments, &id, "{}")
            .await
            .unwrap();

        assert!(second.seq > first.seq);
    }

    #[tokio::test]
    async fn test_mark_failed_keeps_entry() {
        let db = db().await;
        let queue = db.sync_queue();
        let entry = queue
            .enqueue(SyncOperation::Create, StoreKind::Payments, &Identity::new_local(), "{}")
            .await
            .unwrap();

        queue.mark_failed(&entry.id, "connection refused").await.unwrap();
        queue.mark_failed(&entry.id, "timed out").await.unwrap();

        let stored = queue.list_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].attempts, 2);
        assert_eq!(stored[0].last_error.as_deref(), Some("timed out"));
        assert!(stored[0].attempted_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_for_entity_and_counts() {
        let db = db().await;
        let queue = db.sync_queue();
        let target = Identity::new_local();
        let other = Identity::new_local();

        queue
            .enqueue(SyncOperation::Create, StoreKind::Payments, &target, "{}")
            .await
            .unwrap();
        queue
            .enqueue(SyncOperation::Create, StoreKind::LedgerEntries, &other, "{}")
            .await
            .unwrap();

        assert!(queue.has_pending(StoreKind::Payments).await.unwrap());
        assert_eq!(queue.cancel_for_entity(&target).await.unwrap(), 1);
        assert!(!queue.has_pending(StoreKind::Payments).await.unwrap());
        assert_eq!(queue.count_pending().await.unwrap(), 1);
        assert_eq!(queue.count_for_store(StoreKind::LedgerEntries).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pending_delete_ids() {
        let db = db().await;
        let queue = db.sync_queue();
        let deleted = Identity::remote("PAY-1");

        queue
            .enqueue(SyncOperation::Delete, StoreKind::Payments, &deleted, "{}")
            .await
            .unwrap();
        queue
            .enqueue(SyncOperation::Update, StoreKind::Payments, &Identity::remote("PAY-2"), "{}")
            .await
            .unwrap();

        let ids = queue.pending_delete_ids(StoreKind::Payments).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&deleted));
    }

    #[tokio::test]
    async fn test_has_queued_create_ignores_other_operations() {
        let db = db().await;
        let queue = db.sync_queue();
        let payment = Identity::new_local();

        queue
            .enqueue(SyncOperation::Delete, StoreKind::Payments, &payment, "{}")
            .await
            .unwrap();
        assert!(!queue
            .has_queued_create(StoreKind::Payments, &payment)
            .await
            .unwrap());

        let create = queue
            .enqueue(SyncOperation::Create, StoreKind::Payments, &payment, "{}")
            .await
            .unwrap();
        assert!(queue
            .has_queued_create(StoreKind::Payments, &payment)
            .await
            .unwrap());
        assert!(!queue
            .has_queued_create(StoreKind::LedgerEntries, &payment)
            .await
            .unwrap());

        queue.remove(&create.id).await.unwrap();
        assert!(!queue
            .has_queued_create(StoreKind::Payments, &payment)
            .await
            .unwrap());
    }
}
