//! # Core Errors
//!
//! Rule violations detected before anything is written. The sync crate
//! wraps these in `EngineError`; the db crate has its own `DbError`.
//!
//! ```text
//! PaymentInput ──validate()──► ValidationError ─┐
//!                                               ├──► CoreError ──► EngineError
//! compute_aggregate / Identity::parse ──────────┘
//! ```

use thiserror::Error;

use crate::money::Money;

// =============================================================================
// Core Error
// =============================================================================

/// A payment or identity the domain refuses.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The payments recorded against an invoice would exceed its total.
    ///
    /// ## When This Occurs
    /// - A new payment pushes the paid sum past `grand_total + tolerance`
    ///
    /// ## User Workflow
    /// ```text
    /// Invoice total ₹1000.00, already paid ₹900.00
    ///      │
    ///      ▼
    /// Record payment ₹150.00
    ///      │
    ///      ▼
    /// Overpayment { paid: 1050.00, grand_total: 1000.00, excess: 50.00 }
    ///      │
    ///      ▼
    /// UI shows: "Only ₹100.00 is outstanding on this invoice"
    /// ```
    #[error("Overpayment on invoice {invoice_id}: paid {paid} exceeds total {grand_total} by {excess}")]
    Overpayment {
        invoice_id: String,
        paid: Money,
        grand_total: Money,
        excess: Money,
    },

    /// An identity string could not be parsed into a namespace.
    #[error("Invalid identity '{value}': {reason}")]
    InvalidIdentity { value: String, reason: String },

    /// A stored enum value is not one this build understands.
    #[error("Unknown {kind}: '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    pub fn invalid_identity(value: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidIdentity {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// A `PaymentInput` field that fails its shape check.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Empty after trimming.
    #[error("{field} is required")]
    Required { field: String },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Zero or negative amount.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overpayment_message() {
        let err = CoreError::Overpayment {
            invoice_id: "remote:INV-7".to_string(),
            paid: Money::from_minor(105_000),
            grand_total: Money::from_minor(100_000),
            excess: Money::from_minor(5_000),
        };
        assert_eq!(
            err.to_string(),
            "Overpayment on invoice remote:INV-7: paid 1050.00 exceeds total 1000.00 by 50.00"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "party_id".to_string(),
        };
        assert_eq!(err.to_string(), "party_id is required");

        let err = ValidationError::TooLong {
            field: "reference".to_string(),
            max: 64,
        };
        assert_eq!(err.to_string(), "reference must be at most 64 characters");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "amount".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
