// src/db.rs

use std::{str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

use crate::error::AppError;

/// Opening statement for transactions that write.
///
/// A deferred `BEGIN` that reads first fails with `SQLITE_BUSY` when it
/// upgrades to a write lock while another connection writes; `busy_timeout`
/// does not apply to that upgrade.
pub const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

/// Opens a SQLite pool for `database_url`.
///
/// `sqlite::memory:` databases live inside a single connection, so the pool is
/// pinned to exactly one connection that is never recycled.
pub async fn connect(database_url: &str) -> Result<SqlitePool, AppError> {
    let in_memory = database_url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
    };

    Ok(pool_options.connect_with(options).await?)
}

/// Applies the embedded migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
