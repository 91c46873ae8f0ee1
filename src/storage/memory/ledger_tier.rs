//! In-process LedgerTier implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::interfaces::ledger::{IdempotencyKey, IdempotencyRecord, LedgerTier, Result};

/// Short-lived ledger tier held in process memory.
///
/// Serves near-duplicate redeliveries without a durable round trip. Lost on
/// restart, so it must never be the only tier behind the dedup gate.
#[derive(Default)]
pub struct MemoryLedgerTier {
    expiries: RwLock<HashMap<IdempotencyKey, DateTime<Utc>>>,
}

impl MemoryLedgerTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of markers held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.expiries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.expiries.read().await.is_empty()
    }
}

fn expiry(from: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl LedgerTier for MemoryLedgerTier {
    async fn contains(&self, key: &IdempotencyKey) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .expiries
            .read()
            .await
            .get(key)
            .is_some_and(|expires_at| *expires_at > now))
    }

    async fn insert_if_absent(&self, record: &IdempotencyRecord, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let mut expiries = self.expiries.write().await;

        if expiries.get(&record.key).is_some_and(|e| *e > now) {
            return Ok(false);
        }
        expiries.insert(record.key.clone(), expiry(record.processed_at, ttl));
        Ok(true)
    }

    async fn remove(&self, key: &IdempotencyKey) -> Result<()> {
        self.expiries.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut expiries = self.expiries.write().await;
        let before = expiries.len();
        expiries.retain(|_, expires_at| *expires_at > now);
        Ok((before - expiries.len()) as u64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
