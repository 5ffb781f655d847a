//! # billbook-core: Pure Business Logic for the Payment Sync Engine
//!
//! This crate is the **heart** of Billbook's payment engine. It contains the
//! money model, identity namespaces, and the invoice aggregate rules as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Billbook Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Invoice screens / collaborators (out of scope)         │   │
//! │  │    record payment ──► delete payment ──► list payments          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 billbook-sync (PaymentEngine)                   │   │
//! │  │    Recorder, Reconciler, Resolver, Reversal, Drainer            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ billbook-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌───────────┐ ┌──────────┐         │   │
//! │  │   │  money   │ │ identity │ │ reconcile │ │  merge   │         │   │
//! │  │   │  Money   │ │ Local /  │ │ aggregate │ │ local +  │         │   │
//! │  │   │          │ │ Remote   │ │ + guard   │ │ remote   │         │   │
//! │  │   └──────────┘ └──────────┘ └───────────┘ └──────────┘         │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  billbook-db (Database Layer)                   │   │
//! │  │        payments, invoices, sync_queue, ledger, accounts         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Payment, InvoiceSnapshot, SyncQueueEntry, ...)
//! - [`identity`] - Local vs remote identity namespaces
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`reconcile`] - Invoice aggregate derivation and the overpayment guard
//! - [`merge`] - Merging remotely-confirmed and locally-pending payment rows
//! - [`error`] - Domain error types
//! - [`validation`] - Payment input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use billbook_core::money::Money;
//! use billbook_core::reconcile::{compute_aggregate, Tolerance};
//! use billbook_core::InvoiceStatus;
//!
//! let grand_total = Money::from_major_minor(1000, 0);
//! let paid = [Money::from_major_minor(400, 0)];
//!
//! let aggregate = compute_aggregate(grand_total, paid.iter().map(|m| (*m, None)), Tolerance::default());
//! assert_eq!(aggregate.status, InvoiceStatus::Partial);
//! assert_eq!(aggregate.paid_amount.minor_units(), 40_000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod identity;
pub mod merge;
pub mod money;
pub mod reconcile;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use billbook_core::Money` instead of
// `use billbook_core::money::Money`

pub use error::{CoreError, CoreResult, ValidationError};
pub use identity::Identity;
pub use money::Money;
pub use merge::MergedPayments;
pub use reconcile::{GuardMode, InvoiceAggregate, Tolerance};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default overpayment tolerance in minor currency units.
///
/// ## Why 2?
/// Invoice grand totals arrive from the tax collaborator already rounded per
/// line. Summing rounded lines can drift a paisa or two from the rounded
/// document total, so a payment that settles the printed total must not be
/// rejected for exceeding it by that drift. Treated as a policy knob; the
/// engine config can override it.
pub const DEFAULT_OVERPAYMENT_TOLERANCE_MINOR: i64 = 2;

/// Maximum length of a payment reference (UTR, cheque number, card auth code).
pub const MAX_REFERENCE_LEN: usize = 64;

/// Maximum length of free-form payment notes.
pub const MAX_NOTES_LEN: usize = 500;
