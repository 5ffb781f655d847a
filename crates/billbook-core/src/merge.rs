//! # Payment List Merge
//!
//! Combines the remote store's payment rows for an invoice with the rows this
//! device holds locally.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  remote rows ─┬─ id has queued delete ───────────────► hidden           │
//! │               └─ otherwise ──────────────────────────► included         │
//! │                                                         │               │
//! │  local rows ──┬─ Local(uuid)  (not yet confirmed) ────► included        │
//! │               ├─ Remote(tok), also in remote rows ────► remote wins     │
//! │               └─ Remote(tok), missing remotely ───────► included        │
//! │                                                                         │
//! │  sort: payment_date DESC, created_at DESC                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A confirmed local row missing from the remote listing is kept: listing
//! endpoints lag behind creates, and dropping the row would make a payment
//! the user just saw confirmed vanish from the screen.

use std::collections::HashSet;

use crate::identity::Identity;
use crate::types::Payment;

/// Result of [`merge_payments`].
#[derive(Debug, Clone, Default)]
pub struct MergedPayments {
    /// The rows to show, sorted newest first.
    pub payments: Vec<Payment>,
    /// Remote rows this device has no local copy of.
    pub remote_only: Vec<Payment>,
}

/// Merges remote and local rows without duplicating a logical payment.
pub fn merge_payments(
    remote: Vec<Payment>,
    local: Vec<Payment>,
    pending_deletes: &HashSet<Identity>,
) -> MergedPayments {
    let local_ids: HashSet<Identity> = local.iter().map(|p| p.id.clone()).collect();
    let mut remote_ids: HashSet<Identity> = HashSet::with_capacity(remote.len());

    let mut payments = Vec::with_capacity(remote.len() + local.len());
    let mut remote_only = Vec::new();

    for row in remote {
        if pending_deletes.contains(&row.id) || !remote_ids.insert(row.id.clone()) {
            continue;
        }
        if !local_ids.contains(&row.id) {
            remote_only.push(row.clone());
        }
        payments.push(row);
    }

    for row in local {
        if pending_deletes.contains(&row.id) {
            continue;
        }
        match &row.id {
            Identity::Local(_) => payments.push(row),
            Identity::Remote(_) if !remote_ids.contains(&row.id) => payments.push(row),
            Identity::Remote(_) => {}
        }
    }

    sort_newest_first(&mut payments);

    MergedPayments {
        payments,
        remote_only,
    }
}

/// Sorts by `payment_date` descending, then `created_at` descending.
pub fn sort_newest_first(payments: &mut [Payment]) {
    payments.sort_by(|a, b| {
        b.payment_date
            .cmp(&a.payment_date)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::types::PaymentMode;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    fn payment(id: Identity, day: u32, minute: i64) -> Payment {
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap() + Duration::minutes(minute);
        Payment {
            pending_sync: id.is_local(),
            id,
            invoice_id: Identity::remote("INV-1"),
            party_id: "party-1".to_string(),
            amount: Money::from_minor(1_000),
            mode: PaymentMode::Cash,
            payment_date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            reference: None,
            notes: None,
            synced_at: None,
            created_at: created,
            saved_at: created,
            needs_review: false,
            review_reason: None,
        }
    }

    #[test]
    fn test_remote_wins_for_shared_ids() {
        let mut remote_row = payment(Identity::remote("P1"), 2, 0);
        remote_row.amount = Money::from_minor(2_000);
        let local_copy = payment(Identity::remote("P1"), 2, 0);

        let merged = merge_payments(vec![remote_row], vec![local_copy], &HashSet::new());

        assert_eq!(merged.payments.len(), 1);
        assert_eq!(merged.payments[0].amount, Money::from_minor(2_000));
        assert!(merged.remote_only.is_empty());
    }

    #[test]
    fn test_local_pending_rows_are_included() {
        let local = payment(Identity::new_local(), 3, 0);
        let merged = merge_payments(
            vec![payment(Identity::remote("P1"), 1, 0)],
            vec![local.clone()],
            &HashSet::new(),
        );

        assert_eq!(merged.payments.len(), 2);
        assert_eq!(merged.payments[0].id, local.id);
        assert_eq!(merged.remote_only.len(), 1);
    }

    #[test]
    fn test_pending_delete_hides_remote_row() {
        let deletes: HashSet<Identity> = [Identity::remote("P1")].into_iter().collect();
        let merged = merge_payments(
            vec![payment(Identity::remote("P1"), 1, 0), payment(Identity::remote("P2"), 1, 1)],
            vec![],
            &deletes,
        );

        let ids: Vec<_> = merged.payments.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec![Identity::remote("P2")]);
        assert_eq!(merged.remote_only.len(), 1);
    }

    #[test]
    fn test_confirmed_local_row_missing_remotely_is_kept() {
        let merged = merge_payments(
            vec![],
            vec![payment(Identity::remote("P9"), 1, 0)],
            &HashSet::new(),
        );
        assert_eq!(merged.payments.len(), 1);
    }

    #[test]
    fn test_sorted_by_date_then_created_at_desc() {
        let merged = merge_payments(
            vec![
                payment(Identity::remote("OLD"), 1, 0),
                payment(Identity::remote("NEW-EARLY"), 5, 0),
                payment(Identity::remote("NEW-LATE"), 5, 30),
            ],
            vec![],
            &HashSet::new(),
        );

        let ids: Vec<_> = merged.payments.iter().map(|p| p.id.token()).collect();
        assert_eq!(ids, vec!["NEW-LATE", "NEW-EARLY", "OLD"]);
    }

    #[test]
    fn test_duplicate_remote_rows_collapse() {
        let merged = merge_payments(
            vec![payment(Identity::remote("P1"), 1, 0), payment(Identity::remote("P1"), 1, 0)],
            vec![],
            &HashSet::new(),
        );
        assert_eq!(merged.payments.len(), 1);
        assert_eq!(merged.remote_only.len(), 1);
    }
}
