//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite, plus the one
//! multi-table transaction the engine needs: promoting a local identity to
//! the remote one after a confirmed create.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  Engine startup                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbConfig::new(path) ← Configure pool settings                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                           │
//! │  │            SqlitePool                    │                           │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │                           │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │  (max_connections)        │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │                           │
//! │  └─────────────────────────────────────────┘                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Repositories (cheap clones of the pool handle)                        │
//! │  payments() invoices() sync_queue() ledger() accounts()                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! SQLite WAL (Write-Ahead Logging) mode is enabled for file databases:
//! - Readers don't block writers
//! - Better crash recovery: a torn write never corrupts the queue

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::account::AccountRepository;
use crate::repository::invoice::InvoiceRepository;
use crate::repository::ledger::LedgerRepository;
use crate::repository::payment::PaymentRepository;
use crate::repository::sync_queue::{insert_entry, SyncQueueRepository};
use billbook_core::{Identity, StoreKind, SyncOperation, SyncQueueEntry};

const IN_MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/billbook.db")
///     .max_connections(5)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file, or `:memory:`.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection timeout duration.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection. `None` keeps it forever.
    /// Default: 10 minutes
    pub idle_timeout: Option<Duration>,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    ///
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// An in-memory database lives exactly as long as its single connection,
    /// so the connection is never idled out.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(IN_MEMORY_PATH),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            run_migrations: true,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_PATH
    }
}

// =============================================================================
// Promotion
// =============================================================================

/// What happened when a confirmed create was applied locally.
#[derive(Debug, Clone, PartialEq)]
pub enum PromoteOutcome {
    /// The row now carries the remote identity.
    Promoted,
    /// The row was deleted while the create was in flight; a delete for the
    /// remote identity was queued instead.
    EntityGone { delete_entry: SyncQueueEntry },
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite:
    ///    - WAL mode for file databases
    ///    - NORMAL synchronous
    ///    - Foreign keys enabled
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_options = if config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
                .foreign_keys(true)
        } else {
            SqliteConnectOptions::new()
                .filename(&config.database_path)
                // WAL mode: Readers don't block writers
                .journal_mode(SqliteJournalMode::Wal)
                // NORMAL synchronous: durable against corruption; the last
                // transaction may be lost on power failure
                .synchronous(SqliteSynchronous::Normal)
                .foreign_keys(true)
                .create_if_missing(true)
        };

        debug!("Connection options configured");

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout);
        if config.is_in_memory() {
            pool_options = pool_options.max_lifetime(None::<Duration>);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database { pool };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the payment repository.
    pub fn payments(&self) -> PaymentRepository {
        PaymentRepository::new(self.pool.clone())
    }

    /// Returns the invoice snapshot repository.
    pub fn invoices(&self) -> InvoiceRepository {
        InvoiceRepository::new(self.pool.clone())
    }

    /// Returns the sync queue repository.
    pub fn sync_queue(&self) -> SyncQueueRepository {
        SyncQueueRepository::new(self.pool.clone())
    }

    /// Returns the party ledger repository.
    pub fn ledger(&self) -> LedgerRepository {
        LedgerRepository::new(self.pool.clone())
    }

    /// Returns the account balance repository.
    pub fn accounts(&self) -> AccountRepository {
        AccountRepository::new(self.pool.clone())
    }

    /// Applies a confirmed remote create in one transaction.
    ///
    /// ## Steps
    /// ```text
    /// BEGIN
    ///   1. re-key the entity row: local_id → remote_id (confirmed)
    ///   2. re-key rows referring to it (ledger, adjustments, payments)
    ///   3. re-key queued entries and rewrite their payloads
    ///   4. remove the queue entry that carried the create (if any)
    ///   5. row missing? queue a delete for remote_id instead
    /// COMMIT
    /// ```
    ///
    /// A crash before COMMIT leaves the create queued; replaying it is safe
    /// because creates carry an idempotency key.
    pub async fn promote_created(
        &self,
        store: StoreKind,
        local_id: &Identity,
        remote_id: &Identity,
        entry_id: Option<&str>,
    ) -> DbResult<PromoteOutcome> {
        let local = local_id.to_string();
        let remote = remote_id.to_string();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        // 1. The entity row itself
        let rows = match store {
            StoreKind::Payments => {
                sqlx::query(
                    "UPDATE payments SET id = ?2, pending_sync = 0, synced_at = ?3 WHERE id = ?1",
                )
                .bind(&local)
                .bind(&remote)
                .bind(now)
                .execute(&mut *tx)
                .await?
            }
            StoreKind::Invoices => {
                sqlx::query("UPDATE invoices SET id = ?2 WHERE id = ?1")
                    .bind(&local)
                    .bind(&remote)
                    .execute(&mut *tx)
                    .await?
            }
            StoreKind::LedgerEntries => {
                sqlx::query("UPDATE ledger_entries SET id = ?2, pending_sync = 0 WHERE id = ?1")
                    .bind(&local)
                    .bind(&remote)
                    .execute(&mut *tx)
                    .await?
            }
            StoreKind::AccountAdjustments => {
                sqlx::query(
                    "UPDATE account_adjustments SET id = ?2, pending_sync = 0 WHERE id = ?1",
                )
                .bind(&local)
                .bind(&remote)
                .execute(&mut *tx)
                .await?
            }
        }
        .rows_affected();

        // 2. Rows that refer to it
        let references: &[&str] = match store {
            StoreKind::Payments => &[
                "UPDATE ledger_entries SET payment_id = ?2 WHERE payment_id = ?1",
                "UPDATE account_adjustments SET payment_id = ?2 WHERE payment_id = ?1",
            ],
            StoreKind::Invoices => &[
                "UPDATE payments SET invoice_id = ?2 WHERE invoice_id = ?1",
                "UPDATE ledger_entries SET invoice_id = ?2 WHERE invoice_id = ?1",
            ],
            StoreKind::LedgerEntries | StoreKind::AccountAdjustments => &[],
        };
        for sql in references {
            sqlx::query(sql)
                .bind(&local)
                .bind(&remote)
                .execute(&mut *tx)
                .await?;
        }

        // 3. Queued entries. Payloads are JSON, so the replacement text is
        // the JSON-escaped form of the remote id.
        let quoted = serde_json::to_string(&remote)
            .map_err(|e| DbError::Internal(e.to_string()))?;
        let escaped = quoted
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(&quoted);

        sqlx::query("UPDATE sync_queue SET entity_id = ?2 WHERE entity_id = ?1")
            .bind(&local)
            .bind(&remote)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE sync_queue SET payload = REPLACE(payload, ?1, ?2) WHERE instr(payload, ?1) > 0",
        )
        .bind(&local)
        .bind(escaped)
        .execute(&mut *tx)
        .await?;

        // 4. The entry that carried the create
        if let Some(entry_id) = entry_id {
            sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
                .bind(entry_id)
                .execute(&mut *tx)
                .await?;
        }

        // 5. Deleted while in flight
        let outcome = if rows == 0 {
            warn!(
                store = %store,
                local_id = %local_id,
                remote_id = %remote_id,
                "Entity deleted while create was in flight, queueing remote delete"
            );
            let delete_entry =
                insert_entry(&mut *tx, SyncOperation::Delete, store, remote_id, "{}").await?;
            PromoteOutcome::EntityGone { delete_entry }
        } else {
            PromoteOutcome::Promoted
        };

        tx.commit().await?;

        debug!(
            store = %store,
            local_id = %local_id,
            remote_id = %remote_id,
            "Promoted local identity"
        );

        Ok(outcome)
    }

    /// Closes the database connection pool.
    ///
    /// After calling close, all repository operations will fail.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use billbook_core::{
        AccountAdjustment, AccountRef, LedgerEntry, LedgerEntryKind, Money, Payment, PaymentMode,
    };
    use chrono::NaiveDate;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn payment() -> Payment {
        let now = Utc::now();
        Payment {
            id: Identity::new_local(),
            invoice_id: Identity::remote("INV-1"),
            party_id: "party-1".to_string(),
            amount: Money::from_minor(10_000),
            mode: PaymentMode::Cash,
            payment_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            reference: None,
            notes: None,
            pending_sync: true,
            synced_at: None,
            created_at: now,
            saved_at: now,
            needs_review: false,
            review_reason: None,
        }
    }

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = db().await;
        assert!(db.health_check().await);

        let status = migrations::migration_status(db.pool()).await.unwrap();
        assert!(status.is_current());
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(!config.is_in_memory());
        assert!(DbConfig::in_memory().is_in_memory());
    }

    #[tokio::test]
    async fn test_promote_rekeys_row_references_and_queue() {
        let db = db().await;
        let p = payment();
        db.payments().insert(&p).await.unwrap();

        db.ledger()
            .append(&LedgerEntry {
                id: Identity::new_local(),
                party_id: p.party_id.clone(),
                invoice_id: p.invoice_id.clone(),
                payment_id: p.id.clone(),
                kind: LedgerEntryKind::PaymentReceived,
                amount: p.amount,
                memo: "received".to_string(),
                entry_date: p.payment_date,
                pending_sync: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        db.accounts()
            .adjust(&AccountAdjustment {
                id: Identity::new_local(),
                account: AccountRef::Cash,
                delta: p.amount,
                memo: "received".to_string(),
                payment_id: Some(p.id.clone()),
                pending_sync: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let payload = serde_json::to_string(&p).unwrap();
        let create = db
            .sync_queue()
            .enqueue(SyncOperation::Create, StoreKind::Payments, &p.id, &payload)
            .await
            .unwrap();
        let ledger_payload = format!(r#"{{"payment_id":"{}"}}"#, p.id);
        db.sync_queue()
            .enqueue(
                SyncOperation::Create,
                StoreKind::LedgerEntries,
                &Identity::new_local(),
                &ledger_payload,
            )
            .await
            .unwrap();

        let remote = Identity::remote("PAY-77");
        let outcome = db
            .promote_created(StoreKind::Payments, &p.id, &remote, Some(&create.id))
            .await
            .unwrap();
        assert_eq!(outcome, PromoteOutcome::Promoted);

        let promoted = db.payments().get(&remote).await.unwrap().unwrap();
        assert!(!promoted.pending_sync);
        assert!(promoted.synced_at.is_some());
        assert!(db.payments().get(&p.id).await.unwrap().is_none());

        assert_eq!(db.ledger().list_for_payment(&remote).await.unwrap().len(), 1);
        assert_eq!(
            db.accounts().adjustments_for_payment(&remote).await.unwrap().len(),
            1
        );

        let queued = db.sync_queue().list_all().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].store, StoreKind::LedgerEntries);
        assert_eq!(queued[0].payload, r#"{"payment_id":"remote:PAY-77"}"#);
    }

    #[tokio::test]
    async fn test_promote_missing_row_queues_delete() {
        let db = db().await;
        let local = Identity::new_local();
        let remote = Identity::remote("PAY-9");

        let outcome = db
            .promote_created(StoreKind::Payments, &local, &remote, None)
            .await
            .unwrap();

        match outcome {
            PromoteOutcome::EntityGone { delete_entry } => {
                assert_eq!(delete_entry.operation, SyncOperation::Delete);
                assert_eq!(delete_entry.entity_id, remote);
            }
            other => panic!("expected EntityGone, got {:?}", other),
        }
        assert_eq!(db.sync_queue().count_pending().await.unwrap(), 1);
    }
}
