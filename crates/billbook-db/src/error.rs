//! # Database Error Types
//!
//! Failures of the local store. Every one of them is fatal for the write
//! that hit it: the engine surfaces it as `EngineError::Storage` before any
//! remote call is attempted.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error                                                           │
//! │     ├── RowNotFound ──────────────────────────► NotFound               │
//! │     ├── Database("UNIQUE constraint failed: payments.id")              │
//! │     │                                   ──────► DuplicateIdentity      │
//! │     ├── Database("CHECK constraint failed: amount > 0")                │
//! │     │   Database("FOREIGN KEY constraint failed")                      │
//! │     │   Database("NOT NULL constraint failed: ...")                    │
//! │     │                                   ──────► ConstraintViolation    │
//! │     ├── Database("database is locked") ───────► Busy                   │
//! │     ├── PoolTimedOut ─────────────────────────► PoolExhausted          │
//! │     └── PoolClosed / Io ──────────────────────► ConnectionFailed       │
//! │                                                                         │
//! │  row decode (bad identity prefix, unknown enum) ──► CorruptRow         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Which kind of SQLite constraint a write broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Check,
    ForeignKey,
    NotNull,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintKind::Check => write!(f, "CHECK"),
            ConstraintKind::ForeignKey => write!(f, "FOREIGN KEY"),
            ConstraintKind::NotNull => write!(f, "NOT NULL"),
        }
    }
}

/// Local store errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Row not found.
    ///
    /// ## When This Occurs
    /// - Updating the aggregate of an invoice with no snapshot
    /// - `fetch_one` with no match
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// An identity already has a row in this table.
    ///
    /// ## When This Occurs
    /// - Inserting a payment whose id already exists
    /// - Promoting a local id to a remote id another row already holds
    #[error("{column} already holds {value}")]
    DuplicateIdentity { column: String, value: String },

    /// A CHECK, FOREIGN KEY or NOT NULL constraint refused the write.
    ///
    /// ## When This Occurs
    /// - Non-positive payment amount reached the database
    /// - A payment row pointing at an invoice snapshot that does not exist
    #[error("{kind} constraint failed: {detail}")]
    ConstraintViolation { kind: ConstraintKind, detail: String },

    /// A stored row could not be turned back into a domain type.
    ///
    /// ## When This Occurs
    /// - Identity column without a `local:` / `remote:` prefix
    /// - Hand-edited database file
    #[error("Corrupt {table} row {id}: {reason}")]
    CorruptRow {
        table: &'static str,
        id: String,
        reason: String,
    },

    /// Another connection holds the write lock past the busy timeout.
    #[error("Database is busy: {0}")]
    Busy(String),

    /// Could not open or keep the database file.
    ///
    /// ## When This Occurs
    /// - Directory missing and not creatable
    /// - File permissions, disk full
    /// - Pool already closed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An embedded migration could not be applied.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Every pooled connection is in use.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn corrupt(table: &'static str, id: impl Into<String>, reason: impl ToString) -> Self {
        DbError::CorruptRow {
            table,
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// True when retrying the same statement later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }

    /// Maps a SQLite error message to a variant.
    fn from_sqlite_message(msg: &str) -> Self {
        const UNIQUE: &str = "UNIQUE constraint failed: ";

        if let Some(column) = msg.strip_prefix(UNIQUE) {
            return DbError::DuplicateIdentity {
                column: column.trim().to_string(),
                value: "existing row".to_string(),
            };
        }

        let kind = if msg.starts_with("CHECK constraint failed") {
            Some(ConstraintKind::Check)
        } else if msg.starts_with("FOREIGN KEY constraint failed") {
            Some(ConstraintKind::ForeignKey)
        } else if msg.starts_with("NOT NULL constraint failed") {
            Some(ConstraintKind::NotNull)
        } else {
            None
        };

        match kind {
            Some(kind) => DbError::ConstraintViolation {
                kind,
                detail: msg
                    .split_once(": ")
                    .map_or(msg, |(_, detail)| detail)
                    .to_string(),
            },
            None if msg.contains("database is locked") || msg.contains("database is busy") => {
                DbError::Busy(msg.to_string())
            }
            None => DbError::Internal(msg.to_string()),
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "unknown"),
            sqlx::Error::Database(db_err) => DbError::from_sqlite_message(db_err.message()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),
            sqlx::Error::Io(e) => DbError::ConnectionFailed(e.to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
