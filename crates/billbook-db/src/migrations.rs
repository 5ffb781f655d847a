//! # Schema Migrations
//!
//! The local store schema ships inside the binary. Each file under
//! `migrations/sqlite/` is applied once, in filename order, and recorded in
//! `_sqlx_migrations`.
//!
//! ```text
//! Database::new
//!     │
//!     ▼
//! apply_pending ──► 001_initial_schema.sql
//!                     payments · invoices · sync_queue
//!                     ledger_entries · accounts
//! ```
//!
//! Existing files are frozen. A device can sit offline for weeks with queued
//! payloads written against the old schema, so changes go into a new
//! `NNN_description.sql` file.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static SCHEMA: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// How far the open database is behind the embedded schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStatus {
    pub embedded: usize,
    pub applied: usize,
}

impl MigrationStatus {
    pub fn is_current(&self) -> bool {
        self.applied >= self.embedded
    }
}

/// Applies every embedded migration the database has not seen yet.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let before = migration_status(pool).await?;
    if before.is_current() {
        debug!(applied = before.applied, "Schema already current");
        return Ok(());
    }

    SCHEMA.run(pool).await?;

    info!(
        from = before.applied,
        to = before.embedded,
        "Schema migrated"
    );
    Ok(())
}

/// Counts embedded and applied migrations.
///
/// A fresh file has no `_sqlx_migrations` table yet; that reads as zero
/// applied.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<MigrationStatus> {
    let has_table: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;

    let applied: i64 = if has_table > 0 {
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?
    } else {
        0
    };

    Ok(MigrationStatus {
        embedded: SCHEMA.migrations.len(),
        applied: applied as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn bare_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_database_is_behind() {
        let pool = bare_pool().await;

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.applied, 0);
        assert!(!status.is_current());
    }

    #[tokio::test]
    async fn test_run_twice_is_a_no_op() {
        let pool = bare_pool().await;

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert!(status.is_current());
        assert_eq!(status.applied, status.embedded);
    }
}
