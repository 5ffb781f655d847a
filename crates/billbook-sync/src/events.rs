//! # Sync Events
//!
//! User-visible notifications: the pending-sync indicator and warnings such
//! as "the server refused this payment".
//!
//! ```text
//! PaymentEngine / Drainer / SyncAgent
//!        │
//!        ▼
//! Arc<dyn SyncEventEmitter>
//!        ├── emit_status    { online, pending_count, last_sync, ... }
//!        ├── emit_progress  (pending, synced)
//!        └── emit_warning   ("Payment local:… rejected: amount exceeds …")
//! ```
//!
//! The UI layer implements the trait; the daemon uses [`TracingEmitter`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    /// Whether the remote store is believed reachable.
    pub online: bool,

    /// Entries still waiting in the sync queue.
    pub pending_count: i64,

    /// Payments the remote store refused.
    pub needs_review_count: i64,

    /// Last drain that left nothing behind.
    pub last_sync: Option<DateTime<Utc>>,

    /// Last transport error (if any).
    pub last_error: Option<String>,

    /// A drain is in progress.
    pub draining: bool,
}

impl SyncStatus {
    /// True when every local change has reached the remote store.
    pub fn is_fully_synced(&self) -> bool {
        self.pending_count == 0
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Trait for emitting sync events (implemented by the UI integration).
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits a drain progress event.
    fn emit_progress(&self, pending: i64, synced: i64);

    /// Emits a warning the user should see.
    fn emit_warning(&self, message: &str);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _pending: i64, _synced: i64) {}
    fn emit_warning(&self, _message: &str) {}
}

/// Writes every event to the log. Used by the daemon.
pub struct TracingEmitter;

impl SyncEventEmitter for TracingEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        info!(
            online = status.online,
            pending = status.pending_count,
            needs_review = status.needs_review_count,
            draining = status.draining,
            "Sync status"
        );
    }

    fn emit_progress(&self, pending: i64, synced: i64) {
        info!(pending, synced, "Sync progress");
    }

    fn emit_warning(&self, message: &str) {
        warn!(message = %message, "Sync warning");
    }
}
