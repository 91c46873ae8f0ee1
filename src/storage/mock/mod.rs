//! Mock storage implementations for testing.
//!
//! Each mock wraps working in-memory behavior with switches that make the
//! next calls fail, so degradation paths can be exercised.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::interfaces::cache_store::{self, CacheError, CacheStore};
use crate::interfaces::ledger::{self, IdempotencyKey, IdempotencyRecord, LedgerError, LedgerTier};
use crate::storage::memory::{MemoryCacheStore, MemoryLedgerTier};

mod aggregate_store;

pub use aggregate_store::{MockAggregateStore, MockUnitOfWork};

/// Cache store that can be switched into an unavailable state.
#[derive(Default)]
pub struct MockCacheStore {
    inner: MemoryCacheStore,
    unavailable: RwLock<bool>,
}

impl MockCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    /// Live keys matching a glob pattern, sorted.
    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        self.inner.keys(pattern).await
    }

    async fn check(&self) -> cache_store::Result<()> {
        if *self.unavailable.read().await {
            return Err(CacheError::Unavailable("mock cache unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MockCacheStore {
    async fn get(&self, key: &str) -> cache_store::Result<Option<Vec<u8>>> {
        self.check().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> cache_store::Result<()> {
        self.check().await?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> cache_store::Result<()> {
        self.check().await?;
        self.inner.delete(key).await
    }

    async fn delete_matching(&self, pattern: &str) -> cache_store::Result<u64> {
        self.check().await?;
        self.inner.delete_matching(pattern).await
    }

    async fn incr(&self, key: &str, ttl: Duration) -> cache_store::Result<u64> {
        self.check().await?;
        self.inner.incr(key, ttl).await
    }
}

/// Ledger tier that can be switched into an unavailable state.
#[derive(Default)]
pub struct MockLedgerTier {
    inner: MemoryLedgerTier,
    unavailable: RwLock<bool>,
    fail_on_remove: RwLock<bool>,
}

impl MockLedgerTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    pub async fn set_fail_on_remove(&self, fail: bool) {
        *self.fail_on_remove.write().await = fail;
    }

    /// Number of markers held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.is_empty().await
    }

    async fn check(&self) -> ledger::Result<()> {
        if *self.unavailable.read().await {
            return Err(LedgerError::Unavailable("mock ledger unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTier for MockLedgerTier {
    async fn contains(&self, key: &IdempotencyKey) -> ledger::Result<bool> {
        self.check().await?;
        self.inner.contains(key).await
    }

    async fn insert_if_absent(
        &self,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> ledger::Result<bool> {
        self.check().await?;
        self.inner.insert_if_absent(record, ttl).await
    }

    async fn remove(&self, key: &IdempotencyKey) -> ledger::Result<()> {
        self.check().await?;
        if *self.fail_on_remove.read().await {
            return Err(LedgerError::Unavailable("mock remove failure".to_string()));
        }
        self.inner.remove(key).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> ledger::Result<u64> {
        self.check().await?;
        self.inner.purge_expired(now).await
    }

    fn name(&self) -> &str {
        "mock"
    }
}
