//! # Account Repository
//!
//! Running cash/bank balances and the adjustment rows that moved them.
//!
//! ```text
//! adjust(+500.00 cash) ─┬─► INSERT account_adjustments (delta = +50000)
//!                       └─► UPSERT accounts.balance += 50000
//!                            (one transaction)
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use super::parse_identity;
use crate::error::{DbError, DbResult};
use billbook_core::{AccountAdjustment, AccountRef, Identity, Money};

const TABLE: &str = "account_adjustments";

#[derive(Debug, sqlx::FromRow)]
struct AdjustmentRow {
    id: String,
    account: AccountRef,
    delta: Money,
    memo: String,
    payment_id: Option<String>,
    pending_sync: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<AdjustmentRow> for AccountAdjustment {
    type Error = DbError;

    fn try_from(row: AdjustmentRow) -> Result<Self, Self::Error> {
        Ok(AccountAdjustment {
            id: parse_identity(TABLE, &row.id)?,
            account: row.account,
            delta: row.delta,
            memo: row.memo,
            payment_id: row
                .payment_id
                .as_deref()
                .map(|raw| parse_identity(TABLE, raw))
                .transpose()?,
            pending_sync: row.pending_sync,
            created_at: row.created_at,
        })
    }
}

/// Repository for account balances.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    /// Creates a new AccountRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AccountRepository { pool }
    }

    /// Current balance; zero for an account never touched.
    pub async fn balance(&self, account: AccountRef) -> DbResult<Money> {
        let balance: Option<Money> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE account = ?1")
                .bind(account)
                .fetch_optional(&self.pool)
                .await?;

        Ok(balance.unwrap_or_default())
    }

    /// Records an adjustment and moves the balance, atomically.
    ///
    /// ## Returns
    /// The balance after the adjustment.
    pub async fn adjust(&self, adjustment: &AccountAdjustment) -> DbResult<Money> {
        debug!(
            adjustment_id = %adjustment.id,
            account = %adjustment.account,
            delta = %adjustment.delta,
            "Adjusting account balance"
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO account_adjustments (
                id, account, delta, memo, payment_id, pending_sync, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(adjustment.id.to_string())
        .bind(adjustment.account)
        .bind(adjustment.delta)
        .bind(&adjustment.memo)
        .bind(adjustment.payment_id.as_ref().map(|id| id.to_string()))
        .bind(adjustment.pending_sync)
        .bind(adjustment.created_at)
        .execute(&mut *tx)
        .await?;

        let balance: Money = sqlx::query_scalar(
            r#"
            INSERT INTO accounts (account, balance, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(account) DO UPDATE SET
                balance = balance + excluded.balance,
                updated_at = excluded.updated_at
            RETURNING balance
            "#,
        )
        .bind(adjustment.account)
        .bind(adjustment.delta)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(balance)
    }

    /// Adjustments caused by one payment, oldest first.
    pub async fn adjustments_for_payment(
        &self,
        payment_id: &Identity,
    ) -> DbResult<Vec<AccountAdjustment>> {
        let rows: Vec<AdjustmentRow> = sqlx::query_as(
            r#"
            SELECT id, account, delta, memo, payment_id, pending_sync, created_at
            FROM account_adjustments
            WHERE payment_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(payment_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AccountAdjustment::try_from).collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn adjustment(account: AccountRef, delta: i64, payment_id: &Identity) -> AccountAdjustment {
        AccountAdjustment {
            id: Identity::new_local(),
            account,
            delta: Money::from_minor(delta),
            memo: "test".to_string(),
            payment_id: Some(payment_id.clone()),
            pending_sync: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_balance_starts_at_zero() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert_eq!(db.accounts().balance(AccountRef::Cash).await.unwrap(), Money::zero());
    }

    #[tokio::test]
    async fn test_adjust_accumulates_per_account() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let payment_id = Identity::new_local();
        let accounts = db.accounts();

        assert_eq!(
            accounts
                .adjust(&adjustment(AccountRef::Cash, 50_000, &payment_id))
                .await
                .unwrap(),
            Money::from_minor(50_000)
        );
        accounts
            .adjust(&adjustment(AccountRef::Cash, -20_000, &payment_id))
            .await
            .unwrap();
        accounts
            .adjust(&adjustment(AccountRef::Bank, 7_000, &Identity::new_local()))
            .await
            .unwrap();

        assert_eq!(accounts.balance(AccountRef::Cash).await.unwrap(), Money::from_minor(30_000));
        assert_eq!(accounts.balance(AccountRef::Bank).await.unwrap(), Money::from_minor(7_000));
        assert_eq!(accounts.adjustments_for_payment(&payment_id).await.unwrap().len(), 2);
    }
}
