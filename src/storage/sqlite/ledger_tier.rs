//! SQLite durable tier of the idempotency ledger.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::SqlitePool;
use tracing::debug;

use crate::interfaces::ledger::{IdempotencyKey, IdempotencyRecord, LedgerTier, Result};
use crate::storage::schema::{
    ProcessedEvents, CREATE_PROCESSED_EVENTS_EXPIRY_INDEX, CREATE_PROCESSED_EVENTS_TABLE,
};

/// Durable ledger tier backed by the `processed_events` table.
///
/// The `(idempotency_key, event_kind)` primary key is the dedup gate. An
/// expired-but-unpurged row may be reclaimed by a later insert.
pub struct SqliteLedgerTier {
    pool: SqlitePool,
}

impl SqliteLedgerTier {
    /// Create a new SQLite ledger tier.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the processed-events table if it does not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_PROCESSED_EVENTS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_PROCESSED_EVENTS_EXPIRY_INDEX)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn expiry_ms(from: DateTime<Utc>, ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    from.timestamp_millis().saturating_add(ttl_ms)
}

#[async_trait]
impl LedgerTier for SqliteLedgerTier {
    async fn contains(&self, key: &IdempotencyKey) -> Result<bool> {
        let query = Query::select()
            .expr(Expr::val(1))
            .from(ProcessedEvents::Table)
            .and_where(Expr::col(ProcessedEvents::IdempotencyKey).eq(key.key.as_str()))
            .and_where(Expr::col(ProcessedEvents::EventKind).eq(key.kind.as_str()))
            .and_where(Expr::col(ProcessedEvents::ExpiresAtMs).gt(Utc::now().timestamp_millis()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    async fn insert_if_absent(&self, record: &IdempotencyRecord, ttl: Duration) -> Result<bool> {
        let now_ms = Utc::now().timestamp_millis();

        // Single statement: a fresh insert, or a takeover of an expired row.
        // A live row matches neither branch and leaves rows_affected at 0.
        let query = Query::insert()
            .into_table(ProcessedEvents::Table)
            .columns([
                ProcessedEvents::IdempotencyKey,
                ProcessedEvents::EventKind,
                ProcessedEvents::ProcessedAt,
                ProcessedEvents::ExpiresAtMs,
            ])
            .values_panic([
                record.key.key.as_str().into(),
                record.key.kind.as_str().into(),
                record.processed_at.to_rfc3339().into(),
                expiry_ms(record.processed_at, ttl).into(),
            ])
            .on_conflict(
                OnConflict::columns([ProcessedEvents::IdempotencyKey, ProcessedEvents::EventKind])
                    .update_columns([ProcessedEvents::ProcessedAt, ProcessedEvents::ExpiresAtMs])
                    .action_and_where(
                        Expr::col((ProcessedEvents::Table, ProcessedEvents::ExpiresAtMs))
                            .lte(now_ms),
                    )
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;

        let inserted = result.rows_affected() == 1;
        debug!(key = %record.key, inserted, "Durable ledger insert-if-absent");
        Ok(inserted)
    }

    async fn remove(&self, key: &IdempotencyKey) -> Result<()> {
        let query = Query::delete()
            .from_table(ProcessedEvents::Table)
            .and_where(Expr::col(ProcessedEvents::IdempotencyKey).eq(key.key.as_str()))
            .and_where(Expr::col(ProcessedEvents::EventKind).eq(key.kind.as_str()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = Query::delete()
            .from_table(ProcessedEvents::Table)
            .and_where(Expr::col(ProcessedEvents::ExpiresAtMs).lte(now.timestamp_millis()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
