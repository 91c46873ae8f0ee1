//! SQLite implementations of storage interfaces.

mod aggregate_store;
mod ledger_tier;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

pub use aggregate_store::{SqliteAggregateStore, SqliteUnitOfWork};
pub use ledger_tier::SqliteLedgerTier;

/// Open a SQLite pool for the given connection URL.
///
/// File databases use WAL so point reads do not block the unit-of-work
/// writer. `sqlite::memory:` databases are pinned to a single connection
/// that never idles out, since every connection would otherwise get its own
/// empty database.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(url)?
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
    };

    pool_options.connect_with(options).await
}
