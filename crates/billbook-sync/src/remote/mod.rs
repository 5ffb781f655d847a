//! # Remote Store Client
//!
//! The outbound seam to the authoritative store.
//!
//! ## Implementations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RemoteStore (trait)                             │
//! │                                                                         │
//! │  create(store, entity_id, payload) ─► Identity::Remote(token)          │
//! │  update(store, id, payload)                                            │
//! │  delete(store, id)                                                     │
//! │  list_payments(invoice_id)          ─► Vec<Payment> (confirmed rows)   │
//! │  ping()                                                                │
//! │                                                                         │
//! │  ┌───────────────────────────┐      ┌──────────────────────────────┐   │
//! │  │ HttpRemoteStore (http.rs) │      │ MemoryRemoteStore (memory.rs)│   │
//! │  │ reqwest, JSON over REST   │      │ in-process, failure injection│   │
//! │  │ bearer token              │      │ tests and local demos        │   │
//! │  │ Idempotency-Key on create │      │                              │   │
//! │  └───────────────────────────┘      └──────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payloads are the JSON produced by the engine (a serialized `Payment`,
//! `InvoiceSnapshot`, `LedgerEntry` or `AccountAdjustment`). The store
//! answers creates with its own token; the engine wraps it as
//! `Identity::Remote`.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use billbook_core::{Identity, Money, Payment, PaymentMode, StoreKind};

use crate::error::RemoteResult;

pub use http::HttpRemoteStore;
pub use memory::{FailureMode, MemoryRemoteStore};

// =============================================================================
// Remote Store Trait
// =============================================================================

/// Client for the remote authoritative store.
///
/// Every method either succeeds, fails retryably (`Transport`, `Timeout`,
/// `InvalidResponse`) or is refused (`Rejected`). Implementations never
/// retry internally; the caller decides between queueing and flagging.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates an entity. `entity_id` is the local identity and doubles as
    /// the idempotency key, so replaying a create returns the same token.
    async fn create(
        &self,
        store: StoreKind,
        entity_id: &Identity,
        payload: &str,
    ) -> RemoteResult<Identity>;

    /// Replaces an entity the remote store already knows.
    async fn update(&self, store: StoreKind, id: &Identity, payload: &str) -> RemoteResult<()>;

    /// Deletes an entity. Deleting something already gone succeeds.
    async fn delete(&self, store: StoreKind, id: &Identity) -> RemoteResult<()>;

    /// Confirmed payments of an invoice, as the remote store sees them.
    async fn list_payments(&self, invoice_id: &Identity) -> RemoteResult<Vec<Payment>>;

    /// Cheap reachability check used by the connectivity monitor.
    async fn ping(&self) -> RemoteResult<()>;
}

// =============================================================================
// Wire Types
// =============================================================================

/// Body of a successful create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResponse {
    /// Server-assigned token (no namespace prefix).
    pub id: String,
}

/// A payment as listed by the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePaymentRecord {
    /// Server-assigned token.
    pub id: String,
    pub party_id: String,
    /// Minor units.
    pub amount: Money,
    pub mode: PaymentMode,
    pub payment_date: NaiveDate,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemotePaymentRecord {
    /// Converts to a confirmed local row belonging to `invoice_id`.
    pub fn into_payment(self, invoice_id: &Identity, now: DateTime<Utc>) -> Payment {
        Payment {
            id: Identity::remote(self.id),
            invoice_id: invoice_id.clone(),
            party_id: self.party_id,
            amount: self.amount,
            mode: self.mode,
            payment_date: self.payment_date,
            reference: self.reference,
            notes: self.notes,
            pending_sync: false,
            synced_at: Some(self.updated_at.unwrap_or(self.created_at)),
            created_at: self.created_at,
            saved_at: now,
            needs_review: false,
            review_reason: None,
        }
    }
}

/// Error body the remote store may send with a 4xx/5xx.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ApiErrorBody {
    /// Best human-readable reason from a raw error body.
    pub(crate) fn reason(body: &str) -> String {
        match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(parsed) => parsed
                .message
                .or(parsed.error)
                .unwrap_or_else(|| body.trim().to_string()),
            Err(_) => body.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_record_becomes_confirmed_payment() {
        let record: RemotePaymentRecord = serde_json::from_str(
            r#"{
                "id": "PAY-42",
                "party_id": "party-1",
                "amount": 25000,
                "mode": "bank",
                "payment_date": "2024-07-01",
                "created_at": "2024-07-01T10:00:00Z"
            }"#,
        )
        .unwrap();

        let invoice_id = Identity::remote("INV-9");
        let payment = record.into_payment(&invoice_id, Utc::now());

        assert_eq!(payment.id, Identity::remote("PAY-42"));
        assert_eq!(payment.invoice_id, invoice_id);
        assert_eq!(payment.amount, Money::from_minor(25_000));
        assert!(!payment.pending_sync);
        assert!(payment.synced_at.is_some());
    }

    #[test]
    fn test_error_reason_prefers_message() {
        assert_eq!(
            ApiErrorBody::reason(r#"{"message":"amount exceeds outstanding"}"#),
            "amount exceeds outstanding"
        );
        assert_eq!(ApiErrorBody::reason(r#"{"error":"invalid_mode"}"#), "invalid_mode");
        assert_eq!(ApiErrorBody::reason("  plain text  "), "plain text");
    }
}
