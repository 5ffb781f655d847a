//! # Validation Module
//!
//! Input validation for payment writes.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Invoice screen                                                │
//! │  ├── Basic format checks (empty, length)                               │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: PaymentEngine::record_payment                                 │
//! │  ├── Type validation (Identity already parsed, Money is integer)       │
//! │  └── THIS MODULE: Business rule validation                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── CHECK (amount > 0)                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing is written when validation fails.

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::PaymentInput;
use crate::{MAX_NOTES_LEN, MAX_REFERENCE_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Payment Input
// =============================================================================

/// Validates caller input for `record_payment`.
///
/// ## Rules
/// - `party_id` must not be blank
/// - `amount` must be positive
/// - `grand_total` must not be negative
/// - `reference` at most 64 characters, `notes` at most 500
pub fn validate_payment_input(input: &PaymentInput) -> ValidationResult<()> {
    validate_party_id(&input.party_id)?;
    validate_payment_amount(input.amount)?;

    if input.grand_total.is_negative() {
        return Err(ValidationError::InvalidFormat {
            field: "grand_total".to_string(),
            reason: "must not be negative".to_string(),
        });
    }

    if let Some(reference) = &input.reference {
        validate_max_len("reference", reference, MAX_REFERENCE_LEN)?;
    }
    if let Some(notes) = &input.notes {
        validate_max_len("notes", notes, MAX_NOTES_LEN)?;
    }

    Ok(())
}

/// Validates a party (customer) identifier.
pub fn validate_party_id(party_id: &str) -> ValidationResult<()> {
    if party_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "party_id".to_string(),
        });
    }
    Ok(())
}

/// Validates a payment amount.
///
/// ## Example
/// ```rust
/// use billbook_core::money::Money;
/// use billbook_core::validation::validate_payment_amount;
///
/// assert!(validate_payment_amount(Money::from_minor(1)).is_ok());
/// assert!(validate_payment_amount(Money::zero()).is_err());
/// ```
pub fn validate_payment_amount(amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    Ok(())
}

fn validate_max_len(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::types::PaymentMode;
    use chrono::NaiveDate;

    fn input() -> PaymentInput {
        PaymentInput {
            invoice_id: Identity::remote("INV-1"),
            party_id: "party-1".to_string(),
            amount: Money::from_minor(5_000),
            mode: PaymentMode::Bank,
            payment_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            reference: Some("UTR123".to_string()),
            notes: None,
            grand_total: Money::from_minor(10_000),
        }
    }

    #[test]
    fn test_valid_input() {
        assert!(validate_payment_input(&input()).is_ok());
    }

    #[test]
    fn test_amount_must_be_positive() {
        let mut bad = input();
        bad.amount = Money::zero();
        assert!(matches!(
            validate_payment_input(&bad),
            Err(ValidationError::MustBePositive { .. })
        ));

        bad.amount = Money::from_minor(-1);
        assert!(validate_payment_input(&bad).is_err());
    }

    #[test]
    fn test_blank_party_rejected() {
        let mut bad = input();
        bad.party_id = "   ".to_string();
        assert!(matches!(
            validate_payment_input(&bad),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_length_limits() {
        let mut bad = input();
        bad.reference = Some("R".repeat(MAX_REFERENCE_LEN + 1));
        assert!(matches!(
            validate_payment_input(&bad),
            Err(ValidationError::TooLong { max: 64, .. })
        ));

        let mut bad = input();
        bad.notes = Some("n".repeat(MAX_NOTES_LEN + 1));
        assert!(validate_payment_input(&bad).is_err());
    }

    #[test]
    fn test_negative_grand_total_rejected() {
        let mut bad = input();
        bad.grand_total = Money::from_minor(-100);
        assert!(validate_payment_input(&bad).is_err());
    }
}
