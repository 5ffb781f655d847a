//! # Repository Module
//!
//! Database repository implementations for the payment engine.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  PaymentEngine (billbook-sync)                                         │
//! │       │                                                                 │
//! │       │  db.payments().list_for_invoice(&invoice_id)                   │
//! │       ▼                                                                 │
//! │  PaymentRepository                                                     │
//! │  ├── insert / get / delete                                             │
//! │  ├── list_for_invoice                                                  │
//! │  └── flag_for_review / upsert_confirmed                                │
//! │       │                                                                 │
//! │       │  SQL Query → PaymentRow (FromRow) → Payment (TryFrom)          │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`PaymentRepository`](payment::PaymentRepository) - Payment rows
//! - [`InvoiceRepository`](invoice::InvoiceRepository) - Invoice snapshots and aggregates
//! - [`SyncQueueRepository`](sync_queue::SyncQueueRepository) - Durable FIFO of remote mutations
//! - [`LedgerRepository`](ledger::LedgerRepository) - Append-only party journal
//! - [`AccountRepository`](account::AccountRepository) - Cash/bank balances

pub mod account;
pub mod invoice;
pub mod ledger;
pub mod payment;
pub mod sync_queue;

use billbook_core::Identity;

use crate::error::{DbError, DbResult};

/// Parses an identity column, attributing failures to the row.
pub(crate) fn parse_identity(table: &'static str, raw: &str) -> DbResult<Identity> {
    raw.parse::<Identity>()
        .map_err(|e| DbError::corrupt(table, raw, e))
}
