//! Shared fixtures for the engine scenario tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;

use billbook_core::{Identity, Money, PaymentInput, PaymentMode};
use billbook_db::{Database, DbConfig};
use billbook_sync::{ConnectivityOracle, MemoryRemoteStore, PaymentEngine};

pub const GRAND_TOTAL: i64 = 100_000;

pub struct Harness {
    pub engine: PaymentEngine,
    pub remote: Arc<MemoryRemoteStore>,
    pub oracle: ConnectivityOracle,
    pub db: Database,
}

impl Harness {
    pub async fn new(online: bool) -> Self {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Self::with_database(db, Arc::new(MemoryRemoteStore::new()), online)
    }

    pub fn with_database(db: Database, remote: Arc<MemoryRemoteStore>, online: bool) -> Self {
        let oracle = ConnectivityOracle::new(online);
        let engine = PaymentEngine::new(
            db.clone(),
            remote.clone(),
            Arc::new(db.accounts()),
            oracle.clone(),
        );
        Harness {
            engine,
            remote,
            oracle,
            db,
        }
    }
}

pub fn invoice() -> Identity {
    Identity::remote("INV-1")
}

pub fn payment(amount: i64, day: u32) -> PaymentInput {
    PaymentInput {
        invoice_id: invoice(),
        party_id: "party-1".into(),
        amount: Money::from_minor(amount),
        mode: PaymentMode::Cash,
        payment_date: NaiveDate::from_ymd_opt(2024, 7, day).unwrap(),
        reference: None,
        notes: None,
        grand_total: Money::from_minor(GRAND_TOTAL),
    }
}
