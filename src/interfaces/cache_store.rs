//! Cache store interface.

use std::time::Duration;

use async_trait::async_trait;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
///
/// None of these are fatal to a caller: reads degrade to a miss and
/// invalidations are skipped.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache value encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// TTL'd key/value accelerator in front of the aggregate store.
///
/// Implementations:
/// - `MemoryCacheStore`: in-process expiring map
/// - `RedisCacheStore`: Redis strings with `EX`
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read an unexpired value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value that expires after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Remove a single key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key matching a glob pattern. Only `*` wildcards are used
    /// by callers. Returns the number of keys removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64>;

    /// Increment an integer counter, creating it with `ttl` if absent.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64>;
}
