//! # In-Memory Remote Store
//!
//! An in-process authoritative store with switchable failure injection.
//! Tests drive the engine against it; the daemon can run against it with no
//! backend configured.
//!
//! Tokens are `<PREFIX>-<n>` per store (`PAY-1`, `INV-1`, `LED-1`, `ADJ-1`).
//! Replaying a create with the same idempotency key returns the same token.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use billbook_core::{Identity, Payment, StoreKind, SyncOperation};

use super::RemoteStore;
use crate::error::{RemoteError, RemoteResult};

/// How the store answers the next calls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Every call succeeds.
    #[default]
    Healthy,
    /// Every call fails as if the network were down.
    Unreachable,
    /// Every call times out.
    TimingOut,
    /// Every mutation is refused; reads still work.
    Rejecting { status: u16, reason: String },
}

/// A mutation the store accepted, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub operation: SyncOperation,
    pub store: StoreKind,
    /// Remote identity the call targeted (or produced, for creates).
    pub id: Identity,
}

#[derive(Debug, Default)]
struct State {
    mode: FailureMode,
    /// Remaining one-shot failures, consumed before `mode` is consulted.
    scheduled: Vec<FailureMode>,
    records: HashMap<StoreKind, BTreeMap<String, Value>>,
    idempotency: HashMap<String, String>,
    next_token: u64,
    accepted: Vec<RemoteCall>,
    attempts: u64,
}

impl State {
    fn check(&mut self, mutation: bool) -> RemoteResult<()> {
        self.attempts += 1;
        let mode = if self.scheduled.is_empty() {
            self.mode.clone()
        } else {
            self.scheduled.remove(0)
        };

        match mode {
            FailureMode::Healthy => Ok(()),
            FailureMode::Unreachable => Err(RemoteError::Transport("connection refused".into())),
            FailureMode::TimingOut => Err(RemoteError::Timeout(10)),
            FailureMode::Rejecting { status, reason } if mutation => {
                Err(RemoteError::Rejected { status, reason })
            }
            FailureMode::Rejecting { .. } => Ok(()),
        }
    }
}

fn token_prefix(store: StoreKind) -> &'static str {
    match store {
        StoreKind::Payments => "PAY",
        StoreKind::Invoices => "INV",
        StoreKind::LedgerEntries => "LED",
        StoreKind::AccountAdjustments => "ADJ",
    }
}

/// In-process remote store.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    state: Mutex<State>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches the failure mode for all following calls.
    pub async fn set_failure(&self, mode: FailureMode) {
        self.state.lock().await.mode = mode;
    }

    /// Makes the next call fail with `mode`, then falls back to the
    /// configured mode.
    pub async fn fail_next(&self, mode: FailureMode) {
        self.state.lock().await.scheduled.push(mode);
    }

    /// Stores a record directly, as if another device had created it.
    ///
    /// ## Returns
    /// The remote identity of the record.
    pub async fn seed(&self, store: StoreKind, record: Value) -> Identity {
        let mut state = self.state.lock().await;
        state.next_token += 1;
        let token = format!("{}-{}", token_prefix(store), state.next_token);
        state
            .records
            .entry(store)
            .or_default()
            .insert(token.clone(), record);
        Identity::remote(token)
    }

    /// The stored body of a record.
    pub async fn record(&self, store: StoreKind, id: &Identity) -> Option<Value> {
        let state = self.state.lock().await;
        state
            .records
            .get(&store)
            .and_then(|records| records.get(&id.token()))
            .cloned()
    }

    /// Number of records in a store.
    pub async fn count(&self, store: StoreKind) -> usize {
        let state = self.state.lock().await;
        state.records.get(&store).map_or(0, BTreeMap::len)
    }

    /// Mutations accepted so far, oldest first.
    pub async fn accepted_calls(&self) -> Vec<RemoteCall> {
        self.state.lock().await.accepted.clone()
    }

    /// Calls attempted so far, including failed ones.
    pub async fn attempts(&self) -> u64 {
        self.state.lock().await.attempts
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create(
        &self,
        store: StoreKind,
        entity_id: &Identity,
        payload: &str,
    ) -> RemoteResult<Identity> {
        let mut state = self.state.lock().await;
        state.check(true)?;

        let body: Value = serde_json::from_str(payload).map_err(|e| RemoteError::Rejected {
            status: 400,
            reason: format!("malformed body: {}", e),
        })?;

        let key = entity_id.to_string();
        if let Some(token) = state.idempotency.get(&key) {
            debug!(store = %store, key = %key, token = %token, "Replayed create");
            return Ok(Identity::remote(token.clone()));
        }

        state.next_token += 1;
        let token = format!("{}-{}", token_prefix(store), state.next_token);
        state
            .records
            .entry(store)
            .or_default()
            .insert(token.clone(), body);
        state.idempotency.insert(key, token.clone());

        let id = Identity::remote(token);
        state.accepted.push(RemoteCall {
            operation: SyncOperation::Create,
            store,
            id: id.clone(),
        });
        Ok(id)
    }

    async fn update(&self, store: StoreKind, id: &Identity, payload: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        state.check(true)?;

        let body: Value = serde_json::from_str(payload).map_err(|e| RemoteError::Rejected {
            status: 400,
            reason: format!("malformed body: {}", e),
        })?;

        // Invoices are owned by another collaborator; an update is an upsert.
        let records = state.records.entry(store).or_default();
        if store != StoreKind::Invoices && !records.contains_key(&id.token()) {
            return Err(RemoteError::Rejected {
                status: 404,
                reason: format!("{} {} not found", store, id.token()),
            });
        }
        records.insert(id.token(), body);

        state.accepted.push(RemoteCall {
            operation: SyncOperation::Update,
            store,
            id: id.clone(),
        });
        Ok(())
    }

    async fn delete(&self, store: StoreKind, id: &Identity) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        state.check(true)?;

        if let Some(records) = state.records.get_mut(&store) {
            records.remove(&id.token());
        }
        state.accepted.push(RemoteCall {
            operation: SyncOperation::Delete,
            store,
            id: id.clone(),
        });
        Ok(())
    }

    async fn list_payments(&self, invoice_id: &Identity) -> RemoteResult<Vec<Payment>> {
        let mut state = self.state.lock().await;
        state.check(false)?;

        let wanted = invoice_id.to_string();
        let now = Utc::now();
        let Some(records) = state.records.get(&StoreKind::Payments) else {
            return Ok(Vec::new());
        };

        let mut payments = Vec::new();
        for (token, body) in records {
            if body.get("invoice_id").and_then(Value::as_str) != Some(wanted.as_str()) {
                continue;
            }
            let mut payment: Payment = serde_json::from_value(body.clone())
                .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
            payment.id = Identity::remote(token.clone());
            payment.pending_sync = false;
            payment.synced_at = Some(payment.synced_at.unwrap_or(now));
            payment.needs_review = false;
            payment.review_reason = None;
            payments.push(payment);
        }
        Ok(payments)
    }

    async fn ping(&self) -> RemoteResult<()> {
        self.state.lock().await.check(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_idempotent_per_key() {
        let remote = MemoryRemoteStore::new();
        let key = Identity::new_local();

        let first = remote.create(StoreKind::Payments, &key, "{}").await.unwrap();
        let again = remote.create(StoreKind::Payments, &key, "{}").await.unwrap();

        assert_eq!(first, again);
        assert_eq!(remote.count(StoreKind::Payments).await, 1);
        assert_eq!(remote.accepted_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_modes() {
        let remote = MemoryRemoteStore::new();

        remote.set_failure(FailureMode::Unreachable).await;
        assert!(remote.ping().await.unwrap_err().is_retryable());

        remote
            .set_failure(FailureMode::Rejecting {
                status: 422,
                reason: "nope".into(),
            })
            .await;
        assert!(remote.ping().await.is_ok());
        let err = remote
            .create(StoreKind::Payments, &Identity::new_local(), "{}")
            .await
            .unwrap_err();
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let remote = MemoryRemoteStore::new();
        remote.fail_next(FailureMode::TimingOut).await;

        assert_eq!(remote.ping().await, Err(RemoteError::Timeout(10)));
        assert!(remote.ping().await.is_ok());
        assert_eq!(remote.attempts().await, 2);
    }

    #[tokio::test]
    async fn test_update_unknown_payment_is_rejected() {
        let remote = MemoryRemoteStore::new();
        let err = remote
            .update(StoreKind::Payments, &Identity::remote("PAY-404"), "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 404, .. }));
    }
}
