//! Redis LedgerTier implementation.
//!
//! Each marker is a string key set with `SET NX EX`, which gives the atomic
//! insert-if-absent the ledger needs in a single round trip. Redis expires
//! markers itself, so purging is a no-op.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::info;

use super::cache_store::ttl_secs;
use crate::interfaces::ledger::{IdempotencyKey, IdempotencyRecord, LedgerTier, Result};

/// Redis implementation of LedgerTier.
///
/// Key format: `{prefix}:ledger:{kind}:{key}`; the value is the processing
/// timestamp in RFC 3339.
pub struct RedisLedgerTier {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisLedgerTier {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    /// * `key_prefix` - Prefix for all keys (default: "folio")
    pub async fn new(url: &str, key_prefix: Option<&str>) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for idempotency ledger");

        Ok(Self::with_connection(conn, key_prefix))
    }

    /// Build from an existing connection, shared with other Redis users.
    pub fn with_connection(conn: ConnectionManager, key_prefix: Option<&str>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.unwrap_or("folio").to_string(),
        }
    }

    fn marker_key(&self, key: &IdempotencyKey) -> String {
        format!("{}:ledger:{}:{}", self.key_prefix, key.kind, key.key)
    }
}

#[async_trait]
impl LedgerTier for RedisLedgerTier {
    async fn contains(&self, key: &IdempotencyKey) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.marker_key(key)).await?;
        Ok(exists)
    }

    async fn insert_if_absent(&self, record: &IdempotencyRecord, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();

        // Reply is OK when set, nil when the key already existed
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.marker_key(&record.key))
            .arg(record.processed_at.to_rfc3339())
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn remove(&self, key: &IdempotencyKey) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.marker_key(key)).await?;
        Ok(())
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
        Ok(0)
    }

    fn name(&self) -> &str {
        "redis"
    }
}
