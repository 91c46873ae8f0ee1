//! Idempotency ledger configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Fast ledger tier discriminator. The durable tier is always the
/// aggregate store's database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FastTierType {
    /// Per-process TTL map.
    #[default]
    Memory,
    /// Redis `SET NX EX`, shared across consumer instances.
    Redis,
}

/// Idempotency ledger configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Fast tier backend.
    pub fast_tier: FastTierType,
    /// Redis connection URL (used when `fast_tier: redis`).
    pub redis_url: String,
    /// Redis key prefix for ledger markers.
    pub key_prefix: String,
    /// Fast tier marker lifetime.
    pub fast_ttl_secs: u64,
    /// Durable tier marker lifetime. Must outlast the transport's
    /// redelivery window.
    pub retention_secs: u64,
    /// Interval between purges of expired durable markers.
    pub purge_interval_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            fast_tier: FastTierType::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "folio".to_string(),
            fast_ttl_secs: 10 * 60,
            retention_secs: 7 * 24 * 60 * 60,
            purge_interval_secs: 60 * 60,
        }
    }
}

impl LedgerConfig {
    pub fn fast_ttl(&self) -> Duration {
        Duration::from_secs(self.fast_ttl_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}
