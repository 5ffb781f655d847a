//! # Invoice Aggregate Rules
//!
//! Derives an invoice's `paid_amount`, `status` and `last_payment_date` from
//! its payment rows, and enforces the overpayment guard.
//!
//! ## Status Derivation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sum = Σ payment.amount          (exact, integer minor units)          │
//! │                                                                         │
//! │  sum == 0                        → Pending                             │
//! │  sum >= grand_total - tolerance  → Paid                                │
//! │  otherwise                       → Partial                             │
//! │                                                                         │
//! │  sum >  grand_total + tolerance  → OVERPAID (guard trips)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example: the 1000 / 900 / 150 case
//! ```rust
//! use billbook_core::money::Money;
//! use billbook_core::reconcile::{compute_aggregate, Tolerance};
//! use billbook_core::{Identity, InvoiceStatus};
//!
//! let total = Money::from_major_minor(1000, 0);
//! let paid = [Money::from_major_minor(900, 0), Money::from_major_minor(150, 0)];
//!
//! let aggregate = compute_aggregate(total, paid.iter().map(|m| (*m, None)), Tolerance::default());
//! assert!(aggregate.is_overpaid());
//! assert!(aggregate.ensure_within_total(&Identity::remote("INV-1")).is_err());
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::identity::Identity;
use crate::money::Money;
use crate::types::{InvoiceStatus, Payment};
use crate::DEFAULT_OVERPAYMENT_TOLERANCE_MINOR;

// =============================================================================
// Tolerance
// =============================================================================

/// How far the paid sum may drift from the grand total.
///
/// Applies both ways: a sum within `tolerance` below the total counts as
/// paid, and a sum up to `tolerance` above it is not an overpayment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerance(Money);

impl Tolerance {
    pub const fn from_minor(minor: i64) -> Self {
        Tolerance(Money::from_minor(minor))
    }

    pub const fn exact() -> Self {
        Tolerance(Money::zero())
    }

    #[inline]
    pub const fn amount(&self) -> Money {
        self.0
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance::from_minor(DEFAULT_OVERPAYMENT_TOLERANCE_MINOR)
    }
}

/// Whether an overpaid aggregate is an error or only observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// Write paths: an overpaid aggregate is rejected and nothing is written.
    Enforce,
    /// Reads, reversals and rejection handling: the aggregate is written
    /// regardless, with a warning.
    Observe,
}

// =============================================================================
// Aggregate
// =============================================================================

/// The derived payment fields of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceAggregate {
    pub grand_total: Money,
    pub paid_amount: Money,
    pub status: InvoiceStatus,
    #[ts(as = "Option<String>")]
    pub last_payment_date: Option<NaiveDate>,
    /// `paid_amount - grand_total` when positive, else zero.
    pub excess: Money,
    /// True when `paid_amount > grand_total + tolerance`.
    pub overpaid: bool,
    pub payment_count: u32,
}

impl InvoiceAggregate {
    #[inline]
    pub fn is_overpaid(&self) -> bool {
        self.overpaid
    }

    /// Returns `CoreError::Overpayment` when the guard trips.
    pub fn ensure_within_total(&self, invoice_id: &Identity) -> CoreResult<()> {
        if self.overpaid {
            return Err(CoreError::Overpayment {
                invoice_id: invoice_id.to_string(),
                paid: self.paid_amount,
                grand_total: self.grand_total,
                excess: self.excess,
            });
        }
        Ok(())
    }

    /// Whether the stored derived fields already match this aggregate.
    pub fn matches(
        &self,
        paid_amount: Money,
        status: InvoiceStatus,
        last_payment_date: Option<NaiveDate>,
    ) -> bool {
        self.paid_amount == paid_amount
            && self.status == status
            && self.last_payment_date == last_payment_date
    }
}

/// Computes the aggregate from `(amount, payment_date)` pairs.
///
/// Sums saturate at `i64::MAX` rather than wrapping; such a sum is always
/// overpaid anyway.
pub fn compute_aggregate<I>(grand_total: Money, payments: I, tolerance: Tolerance) -> InvoiceAggregate
where
    I: IntoIterator<Item = (Money, Option<NaiveDate>)>,
{
    let mut paid = Money::zero();
    let mut last_payment_date: Option<NaiveDate> = None;
    let mut payment_count = 0u32;

    for (amount, date) in payments {
        paid = paid
            .checked_add(amount)
            .unwrap_or(Money::from_minor(i64::MAX));
        payment_count = payment_count.saturating_add(1);
        if let Some(date) = date {
            last_payment_date = Some(match last_payment_date {
                Some(prev) if prev >= date => prev,
                _ => date,
            });
        }
    }

    let status = derive_status(paid, grand_total, tolerance);
    let excess = if paid > grand_total {
        paid - grand_total
    } else {
        Money::zero()
    };
    let overpaid = paid.minor_units() > grand_total.minor_units().saturating_add(tolerance.amount().minor_units());

    InvoiceAggregate {
        grand_total,
        paid_amount: paid,
        status,
        last_payment_date,
        excess,
        overpaid,
        payment_count,
    }
}

/// Convenience wrapper over [`compute_aggregate`] for full payment rows.
pub fn aggregate_payments(
    grand_total: Money,
    payments: &[Payment],
    tolerance: Tolerance,
) -> InvoiceAggregate {
    compute_aggregate(
        grand_total,
        payments.iter().map(|p| (p.amount, Some(p.payment_date))),
        tolerance,
    )
}

fn derive_status(paid: Money, grand_total: Money, tolerance: Tolerance) -> InvoiceStatus {
    if !paid.is_positive() {
        return InvoiceStatus::Pending;
    }
    if paid.minor_units() >= grand_total.minor_units().saturating_sub(tolerance.amount().minor_units()) {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::Partial
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rupees(r: i64) -> Money {
        Money::from_major_minor(r, 0)
    }

    fn date(d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 5, d)
    }

    #[test]
    fn test_no_payments_is_pending() {
        let agg = compute_aggregate(rupees(1000), std::iter::empty(), Tolerance::default());
        assert_eq!(agg.status, InvoiceStatus::Pending);
        assert_eq!(agg.paid_amount, Money::zero());
        assert_eq!(agg.last_payment_date, None);
        assert_eq!(agg.payment_count, 0);
    }

    #[test]
    fn test_partial_then_paid() {
        let agg = compute_aggregate(
            rupees(1000),
            vec![(rupees(900), date(1)), (rupees(99), date(3))],
            Tolerance::default(),
        );
        assert_eq!(agg.status, InvoiceStatus::Partial);
        assert_eq!(agg.paid_amount, rupees(999));
        assert_eq!(agg.last_payment_date, date(3));
        assert!(!agg.is_overpaid());

        let agg = compute_aggregate(
            rupees(1000),
            vec![(rupees(900), date(1)), (rupees(100), date(2))],
            Tolerance::default(),
        );
        assert_eq!(agg.status, InvoiceStatus::Paid);
    }

    #[test]
    fn test_tolerance_counts_near_total_as_paid() {
        let total = Money::from_minor(100_000);
        let agg = compute_aggregate(
            total,
            vec![(Money::from_minor(99_998), date(1))],
            Tolerance::default(),
        );
        assert_eq!(agg.status, InvoiceStatus::Paid);

        let agg = compute_aggregate(
            total,
            vec![(Money::from_minor(99_998), date(1))],
            Tolerance::exact(),
        );
        assert_eq!(agg.status, InvoiceStatus::Partial);
    }

    #[test]
    fn test_overpayment_guard() {
        let agg = compute_aggregate(
            rupees(1000),
            vec![(rupees(900), date(1)), (rupees(150), date(2))],
            Tolerance::default(),
        );
        assert!(agg.is_overpaid());
        assert_eq!(agg.excess, rupees(50));

        match agg.ensure_within_total(&Identity::remote("INV-9")) {
            Err(CoreError::Overpayment { excess, paid, .. }) => {
                assert_eq!(excess, rupees(50));
                assert_eq!(paid, rupees(1050));
            }
            other => panic!("expected overpayment, got {:?}", other),
        }
    }

    #[test]
    fn test_within_tolerance_is_not_overpaid() {
        let agg = compute_aggregate(
            Money::from_minor(100_000),
            vec![(Money::from_minor(100_002), date(1))],
            Tolerance::default(),
        );
        assert!(!agg.is_overpaid());
        assert_eq!(agg.excess, Money::from_minor(2));
        assert!(agg.ensure_within_total(&Identity::remote("INV-1")).is_ok());
    }

    #[test]
    fn test_last_payment_date_is_max_not_last_seen() {
        let agg = compute_aggregate(
            rupees(1000),
            vec![(rupees(1), date(9)), (rupees(1), date(2)), (rupees(1), date(5))],
            Tolerance::default(),
        );
        assert_eq!(agg.last_payment_date, date(9));
    }

    #[test]
    fn test_order_does_not_matter() {
        let a = compute_aggregate(
            rupees(500),
            vec![(rupees(100), date(1)), (rupees(250), date(4))],
            Tolerance::default(),
        );
        let b = compute_aggregate(
            rupees(500),
            vec![(rupees(250), date(4)), (rupees(100), date(1))],
            Tolerance::default(),
        );
        assert_eq!(a, b);
    }
}
