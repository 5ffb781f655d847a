//! # Remote Mirror
//!
//! Try-remote-else-queue for one logical operation (a record or a delete)
//! and the side effects it drags along.
//!
//! ## Decision per Mutation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  online? ──no──────────────────────────────────────────► ENQUEUE       │
//! │    │yes                                                                 │
//! │  earlier failure in this operation? ──yes──────────────► ENQUEUE       │
//! │    │no                                                                  │
//! │  older entries queued for this store? ──yes────────────► ENQUEUE       │
//! │    │no                                      (keeps per-store FIFO)     │
//! │  side effect of a payment still local:<uuid>? ──yes────► ENQUEUE       │
//! │    │no                                                                  │
//! │  update/delete target still Local? ──yes───────────────► ENQUEUE /     │
//! │    │no                                                   cancel        │
//! │    ▼                                                                    │
//! │  remote call                                                           │
//! │    ├── ok ─────────────► create: promote local id (one transaction)    │
//! │    │                     promote failed? ENQUEUE the create again       │
//! │    ├── transport/timeout ► ENQUEUE, mark degraded, oracle → offline    │
//! │    └── rejected ───────► caller decides (flag for review / warn)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::Value;
use tracing::{debug, error, warn};

use billbook_core::{Identity, StoreKind, SyncDisposition, SyncOperation};
use billbook_db::PromoteOutcome;

use crate::engine::EngineContext;
use crate::error::{EngineResult, RemoteError};

/// Where one mirrored mutation ended up.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MirrorOutcome {
    /// Confirmed remotely. Carries the remote identity of the entity.
    Synced(Identity),
    /// Durable in the sync queue.
    Queued,
    /// Nothing to send (a delete of a never-synced entity).
    NotNeeded,
    /// Refused by the remote store; not queued.
    Rejected(String),
}

impl MirrorOutcome {
    pub(crate) fn disposition(&self) -> SyncDisposition {
        match self {
            MirrorOutcome::Synced(_) | MirrorOutcome::NotNeeded => SyncDisposition::Synced,
            MirrorOutcome::Queued => SyncDisposition::Queued,
            MirrorOutcome::Rejected(reason) => SyncDisposition::Rejected {
                reason: reason.clone(),
            },
        }
    }
}

/// The local payment a ledger entry or account adjustment points at.
///
/// Such a row must not reach the remote store before its payment does: the
/// remote copy would keep the `local:` reference forever.
pub(crate) fn unsynced_payment_reference(store: StoreKind, payload: &str) -> Option<Identity> {
    if !matches!(store, StoreKind::LedgerEntries | StoreKind::AccountAdjustments) {
        return None;
    }

    let body: Value = serde_json::from_str(payload).ok()?;
    let id: Identity = body.get("payment_id")?.as_str()?.parse().ok()?;
    id.is_local().then_some(id)
}

/// Mirrors the mutations of one engine call.
pub(crate) struct RemoteMirror<'a> {
    ctx: &'a EngineContext,
    degraded: bool,
}

impl<'a> RemoteMirror<'a> {
    pub(crate) fn new(ctx: &'a EngineContext) -> Self {
        RemoteMirror {
            ctx,
            degraded: !ctx.connectivity.is_online(),
        }
    }

    /// Sends nothing more for the rest of this call; everything queues.
    pub(crate) fn degrade(&mut self) {
        self.degraded = true;
    }

    async fn may_call(&self, store: StoreKind) -> EngineResult<bool> {
        if self.degraded {
            return Ok(false);
        }
        Ok(!self.ctx.db.sync_queue().has_pending(store).await?)
    }

    async fn enqueue(
        &self,
        operation: SyncOperation,
        store: StoreKind,
        entity_id: &Identity,
        payload: &str,
    ) -> EngineResult<MirrorOutcome> {
        self.ctx
            .db
            .sync_queue()
            .enqueue(operation, store, entity_id, payload)
            .await?;
        Ok(MirrorOutcome::Queued)
    }

    /// Handles a failed call. `Ok(None)` means "queue it".
    fn absorb(
        &mut self,
        operation: SyncOperation,
        store: StoreKind,
        entity_id: &Identity,
        err: RemoteError,
    ) -> Option<MirrorOutcome> {
        match err {
            RemoteError::Rejected { status, reason } => {
                warn!(
                    operation = %operation,
                    store = %store,
                    entity_id = %entity_id,
                    status,
                    reason = %reason,
                    "Remote store rejected mutation"
                );
                Some(MirrorOutcome::Rejected(reason))
            }
            other => {
                warn!(
                    operation = %operation,
                    store = %store,
                    entity_id = %entity_id,
                    error = %other,
                    "Remote call failed, queueing"
                );
                self.degraded = true;
                if !matches!(other, RemoteError::InvalidResponse(_)) {
                    self.ctx.connectivity.set_online(false);
                }
                None
            }
        }
    }

    /// Creates an entity remotely and promotes its identity, or queues it.
    pub(crate) async fn create(
        &mut self,
        store: StoreKind,
        local_id: &Identity,
        payload: &str,
    ) -> EngineResult<MirrorOutcome> {
        if !self.may_call(store).await? {
            return self.enqueue(SyncOperation::Create, store, local_id, payload).await;
        }

        if let Some(payment_id) = unsynced_payment_reference(store, payload) {
            debug!(store = %store, entity_id = %local_id, payment_id = %payment_id, "Payment not created remotely yet, queueing");
            return self.enqueue(SyncOperation::Create, store, local_id, payload).await;
        }

        match self.ctx.remote.create(store, local_id, payload).await {
            Ok(remote_id) => {
                match self
                    .ctx
                    .db
                    .promote_created(store, local_id, &remote_id, None)
                    .await
                {
                    Ok(PromoteOutcome::Promoted) => {
                        debug!(store = %store, local_id = %local_id, remote_id = %remote_id, "Created remotely");
                        Ok(MirrorOutcome::Synced(remote_id))
                    }
                    Ok(PromoteOutcome::EntityGone { .. }) => Ok(MirrorOutcome::Queued),
                    Err(e) => {
                        // The replay carries the same idempotency key and
                        // resolves to the same remote record.
                        error!(
                            store = %store,
                            local_id = %local_id,
                            remote_id = %remote_id,
                            error = %e,
                            "Created remotely but promotion failed, queueing replay"
                        );
                        self.enqueue(SyncOperation::Create, store, local_id, payload).await
                    }
                }
            }
            Err(e) => match self.absorb(SyncOperation::Create, store, local_id, e) {
                Some(outcome) => Ok(outcome),
                None => self.enqueue(SyncOperation::Create, store, local_id, payload).await,
            },
        }
    }

    /// Updates an entity remotely, or queues it.
    pub(crate) async fn update(
        &mut self,
        store: StoreKind,
        id: &Identity,
        payload: &str,
    ) -> EngineResult<MirrorOutcome> {
        if !id.is_remote_addressable() || !self.may_call(store).await? {
            return self.enqueue(SyncOperation::Update, store, id, payload).await;
        }

        match self.ctx.remote.update(store, id, payload).await {
            Ok(()) => Ok(MirrorOutcome::Synced(id.clone())),
            Err(e) => match self.absorb(SyncOperation::Update, store, id, e) {
                Some(outcome) => Ok(outcome),
                None => self.enqueue(SyncOperation::Update, store, id, payload).await,
            },
        }
    }

    /// Deletes an entity remotely, or queues it.
    ///
    /// A Local target never reached the remote store: every queued entry for
    /// it is cancelled and nothing is sent.
    pub(crate) async fn delete(
        &mut self,
        store: StoreKind,
        id: &Identity,
    ) -> EngineResult<MirrorOutcome> {
        if !id.is_remote_addressable() {
            self.ctx.db.sync_queue().cancel_for_entity(id).await?;
            return Ok(MirrorOutcome::NotNeeded);
        }

        if !self.may_call(store).await? {
            return self.enqueue(SyncOperation::Delete, store, id, "{}").await;
        }

        match self.ctx.remote.delete(store, id).await {
            Ok(()) => Ok(MirrorOutcome::Synced(id.clone())),
            Err(e) => match self.absorb(SyncOperation::Delete, store, id, e) {
                Some(outcome) => Ok(outcome),
                None => self.enqueue(SyncOperation::Delete, store, id, "{}").await,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_effects_of_local_payments_are_held() {
        let local = Identity::new_local();
        let ledger = format!(r#"{{"id":"local:x","payment_id":"{}"}}"#, local);

        assert_eq!(
            unsynced_payment_reference(StoreKind::LedgerEntries, &ledger),
            Some(local.clone())
        );
        assert_eq!(
            unsynced_payment_reference(StoreKind::AccountAdjustments, &ledger),
            Some(local)
        );

        let promoted = r#"{"payment_id":"remote:PAY-1"}"#;
        assert_eq!(
            unsynced_payment_reference(StoreKind::LedgerEntries, promoted),
            None
        );
        assert_eq!(
            unsynced_payment_reference(StoreKind::AccountAdjustments, r#"{"payment_id":null}"#),
            None
        );
        assert_eq!(unsynced_payment_reference(StoreKind::Invoices, &ledger), None);
    }

    #[test]
    fn test_disposition_mapping() {
        assert_eq!(
            MirrorOutcome::Synced(Identity::remote("PAY-1")).disposition(),
            SyncDisposition::Synced
        );
        assert_eq!(MirrorOutcome::NotNeeded.disposition(), SyncDisposition::Synced);
        assert_eq!(MirrorOutcome::Queued.disposition(), SyncDisposition::Queued);
        assert_eq!(
            MirrorOutcome::Rejected("over limit".into()).disposition(),
            SyncDisposition::Rejected {
                reason: "over limit".into()
            }
        );
    }
}
