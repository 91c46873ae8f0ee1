//! Cache configuration types.

use std::collections::HashMap;

use serde::Deserialize;

/// Cache backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// In-process expiring map. Only coherent within a single process.
    #[default]
    Memory,
    /// Shared Redis cache.
    Redis,
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache backend.
    #[serde(rename = "type")]
    pub cache_type: CacheType,
    /// Redis connection URL (used when `type: redis`).
    pub redis_url: String,
    /// Leading segment of every cache key.
    pub key_prefix: String,
    /// TTL overrides in seconds, keyed by namespace name (`work`,
    /// `segment`, `seglist`, `views`, `ranking`, `search`, `category`).
    pub ttl_overrides: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "folio".to_string(),
            ttl_overrides: HashMap::new(),
        }
    }
}
