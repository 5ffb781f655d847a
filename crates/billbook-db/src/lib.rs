//! # billbook-db: Durable Local Store
//!
//! Everything the engine knows survives a restart here: payments, invoice
//! snapshots, ledger entries, account balances and the outbound sync queue.
//! One SQLite file, reached through a sqlx pool.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Billbook Data Flow                               │
//! │                                                                         │
//! │  PaymentEngine::record_payment                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    billbook-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐   │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │   │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │   │   │
//! │  │   │               │    │ PaymentRepo    │   │              │   │   │
//! │  │   │ SqlitePool    │◄───│ InvoiceRepo    │   │ 001_initial  │   │   │
//! │  │   │ promote_      │    │ SyncQueueRepo  │   │ _schema.sql  │   │   │
//! │  │   │   created()   │    │ LedgerRepo     │   │              │   │   │
//! │  │   │               │    │ AccountRepo    │   │              │   │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/billbook/billbook.db                               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, repository accessors, promotion transaction
//! - [`migrations`] - Schema shipped in the binary
//! - [`error`] - `DbError` and the sqlx error mapping
//! - [`repository`] - One repository per table
//!
//! ## Usage
//!
//! ```rust,ignore
//! use billbook_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/billbook.db")).await?;
//! let rows = db.payments().list_for_invoice(&invoice_id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{ConstraintKind, DbError, DbResult};
pub use migrations::MigrationStatus;
pub use pool::{Database, DbConfig, PromoteOutcome};

pub use repository::account::AccountRepository;
pub use repository::invoice::InvoiceRepository;
pub use repository::ledger::LedgerRepository;
pub use repository::payment::PaymentRepository;
pub use repository::sync_queue::SyncQueueRepository;
