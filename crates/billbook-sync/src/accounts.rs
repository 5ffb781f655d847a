//! # Account Book
//!
//! Cash and bank balances move when a payment is received or reversed. The
//! engine only sees this trait; the SQLite implementation lives on
//! [`AccountRepository`], and [`MemoryAccountBook`] stands in for it in tests.
//!
//! ```text
//! mode   │ account
//! ───────┼────────
//! cash   │ cash
//! bank   │ bank
//! card   │ bank
//! wallet │ bank
//! cheque │ (none until cleared)
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use billbook_core::{AccountAdjustment, AccountRef, Identity, Money};
use billbook_db::AccountRepository;

use crate::error::EngineResult;

/// Balance collaborator.
#[async_trait]
pub trait AccountBook: Send + Sync {
    /// Current balance of an account.
    async fn balance(&self, account: AccountRef) -> EngineResult<Money>;

    /// Moves a balance by `delta` and records why.
    ///
    /// ## Returns
    /// The recorded adjustment (Local identity, pending sync).
    async fn adjust(
        &self,
        account: AccountRef,
        delta: Money,
        memo: &str,
        payment_id: Option<&Identity>,
    ) -> EngineResult<AccountAdjustment>;
}

fn new_adjustment(
    account: AccountRef,
    delta: Money,
    memo: &str,
    payment_id: Option<&Identity>,
) -> AccountAdjustment {
    AccountAdjustment {
        id: Identity::new_local(),
        account,
        delta,
        memo: memo.to_string(),
        payment_id: payment_id.cloned(),
        pending_sync: true,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl AccountBook for AccountRepository {
    async fn balance(&self, account: AccountRef) -> EngineResult<Money> {
        Ok(AccountRepository::balance(self, account).await?)
    }

    async fn adjust(
        &self,
        account: AccountRef,
        delta: Money,
        memo: &str,
        payment_id: Option<&Identity>,
    ) -> EngineResult<AccountAdjustment> {
        let adjustment = new_adjustment(account, delta, memo, payment_id);
        AccountRepository::adjust(self, &adjustment).await?;
        Ok(adjustment)
    }
}

/// Balances held in memory.
#[derive(Debug, Default)]
pub struct MemoryAccountBook {
    balances: Mutex<HashMap<AccountRef, Money>>,
    history: Mutex<Vec<AccountAdjustment>>,
}

impl MemoryAccountBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every adjustment made so far, oldest first.
    pub async fn history(&self) -> Vec<AccountAdjustment> {
        self.history.lock().await.clone()
    }
}

#[async_trait]
impl AccountBook for MemoryAccountBook {
    async fn balance(&self, account: AccountRef) -> EngineResult<Money> {
        Ok(self
            .balances
            .lock()
            .await
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn adjust(
        &self,
        account: AccountRef,
        delta: Money,
        memo: &str,
        payment_id: Option<&Identity>,
    ) -> EngineResult<AccountAdjustment> {
        let adjustment = new_adjustment(account, delta, memo, payment_id);
        *self.balances.lock().await.entry(account).or_default() += delta;
        self.history.lock().await.push(adjustment.clone());
        Ok(adjustment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billbook_db::{Database, DbConfig};

    #[tokio::test]
    async fn test_sqlite_book_moves_balance() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let book: &dyn AccountBook = &db.accounts();
        let payment_id = Identity::new_local();

        let adjustment = book
            .adjust(AccountRef::Bank, Money::from_minor(12_500), "Payment received", Some(&payment_id))
            .await
            .unwrap();

        assert!(adjustment.id.is_local());
        assert_eq!(adjustment.payment_id, Some(payment_id.clone()));
        assert_eq!(book.balance(AccountRef::Bank).await.unwrap(), Money::from_minor(12_500));
        assert_eq!(
            db.accounts().adjustments_for_payment(&payment_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_memory_book_reversal_nets_to_zero() {
        let book = MemoryAccountBook::new();
        book.adjust(AccountRef::Cash, Money::from_minor(500), "in", None)
            .await
            .unwrap();
        book.adjust(AccountRef::Cash, Money::from_minor(-500), "out", None)
            .await
            .unwrap();

        assert_eq!(book.balance(AccountRef::Cash).await.unwrap(), Money::zero());
        assert_eq!(book.history().await.len(), 2);
    }
}
