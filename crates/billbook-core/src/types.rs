//! # Domain Types
//!
//! Core domain types used throughout the Billbook payment engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Payment      │   │ InvoiceSnapshot │   │ SyncQueueEntry  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (Identity)  │──►│  id (Identity)  │   │  seq (FIFO key) │       │
//! │  │  invoice_id     │   │  grand_total    │   │  operation      │       │
//! │  │  amount (Money) │   │  paid_amount ◄──┼───┤  store          │       │
//! │  │  pending_sync   │   │  status         │   │  entity_id      │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  LedgerEntry    │   │AccountAdjustment│   │  PaymentMode    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  received /     │   │  cash | bank    │   │  cash  → cash   │       │
//! │  │  reversed       │   │  delta (signed) │   │  bank  → bank   │       │
//! │  │  (append-only)  │   │                 │   │  cheque → none  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Derived Fields
//! `InvoiceSnapshot::{paid_amount, status, last_payment_date}` are never set
//! by callers. Only the reconciler writes them, and always from the full
//! payment set.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;
use crate::identity::Identity;
use crate::money::Money;

// =============================================================================
// Payment Mode
// =============================================================================

/// How the customer paid.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    /// Physical cash at the counter.
    Cash,
    /// Bank transfer (NEFT/IMPS/UPI to the merchant account).
    Bank,
    /// Card on an external terminal; settles into the bank account.
    Card,
    /// Wallet payment; settles into the bank account.
    Wallet,
    /// Cheque. No money moves until it clears.
    Cheque,
}

impl PaymentMode {
    /// The account this mode moves money into, if any.
    ///
    /// ## Mapping
    /// ```text
    /// cash                 → Some(Cash)
    /// bank | card | wallet → Some(Bank)
    /// cheque               → None   (not cleared yet)
    /// ```
    pub fn account(&self) -> Option<AccountRef> {
        match self {
            PaymentMode::Cash => Some(AccountRef::Cash),
            PaymentMode::Bank | PaymentMode::Card | PaymentMode::Wallet => Some(AccountRef::Bank),
            PaymentMode::Cheque => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Cash => "cash",
            PaymentMode::Bank => "bank",
            PaymentMode::Card => "card",
            PaymentMode::Wallet => "wallet",
            PaymentMode::Cheque => "cheque",
        }
    }
}

impl fmt::Display for PaymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment
// =============================================================================

/// A payment received against an invoice.
///
/// An invoice can have many payments (part payments over weeks are the norm
/// for credit customers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Payment {
    /// `local:<uuid>` until the remote store confirms it, then `remote:<token>`.
    #[ts(as = "String")]
    pub id: Identity,
    #[ts(as = "String")]
    pub invoice_id: Identity,
    pub party_id: String,
    /// Amount received, always positive.
    pub amount: Money,
    pub mode: PaymentMode,
    #[ts(as = "String")]
    pub payment_date: NaiveDate,
    /// External reference (UTR, cheque number, card auth code).
    pub reference: Option<String>,
    pub notes: Option<String>,
    /// True until the remote store has confirmed this row.
    pub pending_sync: bool,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    /// When the row became durable on this device.
    #[ts(as = "String")]
    pub saved_at: DateTime<Utc>,
    /// Set when the remote store rejected this payment.
    #[serde(default)]
    pub needs_review: bool,
    #[serde(default)]
    pub review_reason: Option<String>,
}

impl Payment {
    /// Builds a fresh, locally-owned payment from caller input.
    pub fn from_input(input: &PaymentInput, now: DateTime<Utc>) -> Self {
        Payment {
            id: Identity::new_local(),
            invoice_id: input.invoice_id.clone(),
            party_id: input.party_id.trim().to_string(),
            amount: input.amount,
            mode: input.mode,
            payment_date: input.payment_date,
            reference: input.reference.clone(),
            notes: input.notes.clone(),
            pending_sync: true,
            synced_at: None,
            created_at: now,
            saved_at: now,
            needs_review: false,
            review_reason: None,
        }
    }
}

/// Caller input for recording a payment.
///
/// `grand_total` is fetched by the caller from the invoice collaborator; it
/// seeds the local invoice snapshot when none exists yet.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentInput {
    #[ts(as = "String")]
    pub invoice_id: Identity,
    pub party_id: String,
    pub amount: Money,
    pub mode: PaymentMode,
    #[ts(as = "String")]
    pub payment_date: NaiveDate,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub grand_total: Money,
}

// =============================================================================
// Invoice Snapshot
// =============================================================================

/// Payment status of an invoice, derived from its payment rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    /// Nothing received yet.
    Pending,
    /// Something received, balance outstanding.
    Partial,
    /// Settled (within tolerance).
    Paid,
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        InvoiceStatus::Pending
    }
}

/// The local copy of the invoice fields the payment engine cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceSnapshot {
    #[ts(as = "String")]
    pub id: Identity,
    pub party_id: String,
    /// Owned by the invoice collaborator (tax arithmetic happens there).
    pub grand_total: Money,
    pub paid_amount: Money,
    pub status: InvoiceStatus,
    #[ts(as = "Option<String>")]
    pub last_payment_date: Option<NaiveDate>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl InvoiceSnapshot {
    /// Amount still owed, never negative.
    pub fn outstanding(&self) -> Money {
        let due = self.grand_total - self.paid_amount;
        if due.is_negative() {
            Money::zero()
        } else {
            due
        }
    }
}

// =============================================================================
// Sync Queue
// =============================================================================

/// The mutation a queue entry replays against the remote store.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        })
    }
}

/// Remote collection a queue entry targets.
///
/// FIFO ordering is guaranteed per store, not globally.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Payments,
    Invoices,
    LedgerEntries,
    AccountAdjustments,
}

impl StoreKind {
    /// Every store, in the order the drainer visits them.
    pub const ALL: [StoreKind; 4] = [
        StoreKind::Payments,
        StoreKind::Invoices,
        StoreKind::LedgerEntries,
        StoreKind::AccountAdjustments,
    ];

    /// Collection name; also the REST path segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Payments => "payments",
            StoreKind::Invoices => "invoices",
            StoreKind::LedgerEntries => "ledger_entries",
            StoreKind::AccountAdjustments => "account_adjustments",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoreKind::ALL
            .into_iter()
            .find(|store| store.as_str() == s)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "store",
                value: s.to_string(),
            })
    }
}

/// A durable record of a remote mutation that has not been confirmed yet.
///
/// ## Removal Rules
/// An entry leaves the queue only when:
/// - the remote store confirmed it
/// - the remote store rejected it (non-retryable)
/// - the reversal path cancelled it (the local row it would create is gone)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncQueueEntry {
    pub id: String,
    /// Monotonic, FIFO key within a store.
    pub seq: i64,
    pub operation: SyncOperation,
    pub store: StoreKind,
    #[ts(as = "String")]
    pub entity_id: Identity,
    /// The entity as JSON.
    pub payload: String,
    #[ts(as = "String")]
    pub enqueued_at: DateTime<Utc>,
    /// Number of failed transport attempts.
    pub attempts: i64,
    pub last_error: Option<String>,
    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,
}

/// Where a mutation ended up after a record or delete call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncDisposition {
    /// Confirmed by the remote store during the call.
    Synced,
    /// Durable locally, waiting in the sync queue.
    Queued,
    /// Refused by the remote store; the row is flagged for review.
    Rejected { reason: String },
}

// =============================================================================
// Party Ledger
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    PaymentReceived,
    PaymentReversed,
}

/// One line of the party (customer) journal.
///
/// Append-only: a reversal adds a `PaymentReversed` line, it never removes
/// the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LedgerEntry {
    #[ts(as = "String")]
    pub id: Identity,
    pub party_id: String,
    #[ts(as = "String")]
    pub invoice_id: Identity,
    #[ts(as = "String")]
    pub payment_id: Identity,
    pub kind: LedgerEntryKind,
    pub amount: Money,
    pub memo: String,
    #[ts(as = "String")]
    pub entry_date: NaiveDate,
    pub pending_sync: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Accounts
// =============================================================================

/// Merchant account a payment settles into.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum AccountRef {
    Cash,
    Bank,
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccountRef::Cash => "cash",
            AccountRef::Bank => "bank",
        })
    }
}

/// A signed movement on an account balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AccountAdjustment {
    #[ts(as = "String")]
    pub id: Identity,
    pub account: AccountRef,
    /// Positive on receipt, negative on reversal.
    pub delta: Money,
    pub memo: String,
    #[ts(as = "Option<String>")]
    pub payment_id: Option<Identity>,
    pub pending_sync: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_account_mapping() {
        assert_eq!(PaymentMode::Cash.account(), Some(AccountRef::Cash));
        assert_eq!(PaymentMode::Bank.account(), Some(AccountRef::Bank));
        assert_eq!(PaymentMode::Card.account(), Some(AccountRef::Bank));
        assert_eq!(PaymentMode::Wallet.account(), Some(AccountRef::Bank));
        assert_eq!(PaymentMode::Cheque.account(), None);
    }

    #[test]
    fn test_store_kind_parses_its_own_name() {
        for store in StoreKind::ALL {
            assert_eq!(store.as_str().parse::<StoreKind>().unwrap(), store);
        }
        assert!("products".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_invoice_status_default() {
        assert_eq!(InvoiceStatus::default(), InvoiceStatus::Pending);
    }

    #[test]
    fn test_disposition_json_shape() {
        let json = serde_json::to_string(&SyncDisposition::Rejected {
            reason: "closed period".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"rejected","reason":"closed period"}"#);
    }

    #[test]
    fn test_payment_from_input_is_local_and_pending() {
        let input = PaymentInput {
            invoice_id: Identity::remote("INV-7"),
            party_id: "  party-1 ".to_string(),
            amount: Money::from_minor(10_000),
            mode: PaymentMode::Cash,
            payment_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            reference: None,
            notes: None,
            grand_total: Money::from_minor(100_000),
        };
        let payment = Payment::from_input(&input, Utc::now());

        assert!(payment.id.is_local());
        assert!(payment.pending_sync);
        assert!(payment.synced_at.is_none());
        assert_eq!(payment.party_id, "party-1");
    }

    #[test]
    fn test_outstanding_never_negative() {
        let snapshot = InvoiceSnapshot {
            id: Identity::remote("INV-1"),
            party_id: "p".to_string(),
            grand_total: Money::from_minor(1000),
            paid_amount: Money::from_minor(1001),
            status: InvoiceStatus::Paid,
            last_payment_date: None,
            updated_at: Utc::now(),
        };
        assert_eq!(snapshot.outstanding(), Money::zero());
    }
}
