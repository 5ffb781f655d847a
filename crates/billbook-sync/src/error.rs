//! # Engine Error Types
//!
//! Error types for the payment engine, the remote store client and config.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Remote Store   │  │     Caller-facing       │ │
//! │  │  (ConfigError)  │  │  (RemoteError)  │  │     (EngineError)       │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport  ┐   │  │  Storage      (fatal)   │ │
//! │  │  MissingDeviceId│  │  Timeout    ┘ retry │  Overpayment  (rollback)│ │
//! │  │  InvalidUrl     │  │  Rejected  (no) │  │  Invalid / NotFound     │ │
//! │  │  Load/Save      │  │  InvalidResponse│  │  Config                 │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  RemoteError never reaches callers of record/delete: a retryable       │
//! │  error degrades to a queued mutation, a rejection flags the row.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use billbook_core::{CoreError, ValidationError};
use billbook_db::DbError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for remote store calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

// =============================================================================
// Engine Error
// =============================================================================

/// Errors surfaced by [`crate::PaymentEngine`].
///
/// Only local failures propagate. Anything the remote store does is absorbed
/// into a [`billbook_core::SyncDisposition`].
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Local Storage
    // =========================================================================
    /// The local store failed. Nothing was sent anywhere.
    ///
    /// ## When This Occurs
    /// - Disk full or database locked while inserting the payment row
    /// - The aggregate write failed (the payment row was rolled back)
    #[error("Local storage failed: {0}")]
    Storage(#[from] DbError),

    // =========================================================================
    // Business Rules
    // =========================================================================
    /// The payment would push the invoice past its total.
    ///
    /// ## When This Occurs
    /// - `sum(payments) > grand_total + tolerance` after adding the new row;
    ///   the tentative row has already been removed
    #[error("{0}")]
    Overpayment(CoreError),

    /// Input failed validation before anything was written.
    #[error("Invalid payment: {0}")]
    Invalid(#[from] ValidationError),

    /// The payment does not exist locally, or belongs to another invoice.
    #[error("Payment {payment_id} not found on invoice {invoice_id}")]
    PaymentNotFound {
        payment_id: String,
        invoice_id: String,
    },

    // =========================================================================
    // Configuration
    // =========================================================================
    #[error(transparent)]
    Config(#[from] ConfigError),

    // =========================================================================
    // Internal
    // =========================================================================
    /// A queue payload could not be (de)serialized.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// The background agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => EngineError::Invalid(v),
            over @ CoreError::Overpayment { .. } => EngineError::Overpayment(over),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl EngineError {
    /// Returns true if the caller can fix this by changing the input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EngineError::Overpayment(_)
                | EngineError::Invalid(_)
                | EngineError::PaymentNotFound { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(self, EngineError::Config(_))
    }
}

// =============================================================================
// Remote Error
// =============================================================================

/// Failure of a single remote store call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection refused, DNS failure, reset, or a 5xx/429 answer.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// No answer within the configured request timeout.
    #[error("Remote call timed out after {0} seconds")]
    Timeout(u64),

    /// The remote store understood the request and refused it.
    ///
    /// ## When This Occurs
    /// - Validation failure on the server (4xx other than 408/425/429)
    /// - The server-side overpayment guard tripped (another device paid)
    #[error("Rejected by remote store ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    /// A success answer whose body could not be understood.
    #[error("Invalid response from remote store: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Returns true if the same call may succeed later.
    ///
    /// ## Retryable Errors
    /// - Transport failures and timeouts
    /// - Unreadable success bodies (the write may or may not have landed;
    ///   creates are replayed with the same idempotency key)
    ///
    /// ## Non-Retryable Errors
    /// - Rejections
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::Rejected { .. })
    }

    /// Returns true if the remote store refused the mutation.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RemoteError::Rejected { .. })
    }
}

// =============================================================================
// Config Error
// =============================================================================

/// Errors loading, validating or saving [`crate::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid engine configuration.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID (required for idempotency keys and logs).
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Invalid remote store URL.
    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    LoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    SaveFailed(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::SaveFailed(err.to_string())
    }
}

impl From<url::ParseError> for ConfigError {
    fn from(err: url::ParseError) -> Self {
        ConfigError::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billbook_core::Money;

    #[test]
    fn test_retryable_errors() {
        assert!(RemoteError::Transport("connection refused".into()).is_retryable());
        assert!(RemoteError::Timeout(10).is_retryable());
        assert!(RemoteError::InvalidResponse("not json".into()).is_retryable());

        let rejected = RemoteError::Rejected {
            status: 422,
            reason: "amount exceeds outstanding".into(),
        };
        assert!(!rejected.is_retryable());
        assert!(rejected.is_rejection());
    }

    #[test]
    fn test_core_error_mapping() {
        let over = CoreError::Overpayment {
            invoice_id: "remote:INV-1".into(),
            paid: Money::from_minor(105_000),
            grand_total: Money::from_minor(100_000),
            excess: Money::from_minor(5_000),
        };
        let err = EngineError::from(over);
        assert!(matches!(err, EngineError::Overpayment(_)));
        assert!(err.is_user_error());
        assert!(err.to_string().contains("remote:INV-1"));

        let invalid = EngineError::from(CoreError::Validation(ValidationError::MustBePositive {
            field: "amount".into(),
        }));
        assert!(matches!(invalid, EngineError::Invalid(_)));
    }

    #[test]
    fn test_config_error_category() {
        let err = EngineError::from(ConfigError::MissingDeviceId);
        assert!(err.is_config_error());
        assert!(!err.is_user_error());
    }
}
