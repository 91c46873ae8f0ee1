//! Storage implementations.
//!
//! - `sqlite`: aggregate store and durable ledger tier
//! - `redis`: cache store and ledger tier
//! - `memory`: in-process cache store and fast ledger tier
//! - `mock`: failure-injecting test doubles

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{CacheConfig, CacheType, FastTierType, LedgerConfig};
#[cfg(feature = "sqlite")]
use crate::config::StorageConfig;
#[cfg(feature = "sqlite")]
use crate::interfaces::AggregateStore;
use crate::interfaces::{CacheStore, LedgerTier};
#[cfg(any(feature = "sqlite", feature = "redis"))]
use crate::utils::bootstrap::connect_with_retry;

pub mod memory;
pub mod mock;

#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{MemoryCacheStore, MemoryLedgerTier};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteAggregateStore, SqliteLedgerTier};

#[cfg(feature = "redis")]
pub use redis::{RedisCacheStore, RedisLedgerTier};

/// Open the database and initialize its schema.
///
/// Returns the aggregate store and the durable ledger tier, which share one
/// connection pool.
#[cfg(feature = "sqlite")]
pub async fn init_storage(
    config: &StorageConfig,
) -> Result<(Arc<dyn AggregateStore>, Arc<dyn LedgerTier>), Box<dyn std::error::Error>> {
    info!(url = %config.url, "Storage: sqlite");

    if let Some(parent) = config.file_path().map(std::path::Path::new).and_then(|p| p.parent()) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = connect_with_retry("sqlite", || sqlite::connect(&config.url)).await?;

    let store = SqliteAggregateStore::new(pool.clone());
    store.init().await?;
    let ledger = SqliteLedgerTier::new(pool);
    ledger.init().await?;

    let store: Arc<dyn AggregateStore> = Arc::new(store);
    let ledger: Arc<dyn LedgerTier> = Arc::new(ledger);
    Ok((store, ledger))
}

/// Build the configured cache store.
pub async fn init_cache(
    config: &CacheConfig,
) -> Result<Arc<dyn CacheStore>, Box<dyn std::error::Error>> {
    info!(cache_type = ?config.cache_type, prefix = %config.key_prefix, "Cache");

    match config.cache_type {
        CacheType::Memory => Ok(Arc::new(MemoryCacheStore::new())),
        #[cfg(feature = "redis")]
        CacheType::Redis => {
            let store =
                connect_with_retry("redis", || RedisCacheStore::new(&config.redis_url)).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        CacheType::Redis => {
            error!("Redis cache requested but 'redis' feature is not enabled");
            Err("Redis feature not enabled".into())
        }
    }
}

/// Build the configured fast ledger tier.
pub async fn init_fast_ledger_tier(
    config: &LedgerConfig,
) -> Result<Arc<dyn LedgerTier>, Box<dyn std::error::Error>> {
    info!(fast_tier = ?config.fast_tier, "Idempotency ledger fast tier");

    match config.fast_tier {
        FastTierType::Memory => Ok(Arc::new(MemoryLedgerTier::new())),
        #[cfg(feature = "redis")]
        FastTierType::Redis => {
            let tier = connect_with_retry("redis", || {
                RedisLedgerTier::new(&config.redis_url, Some(&config.key_prefix))
            })
            .await?;
            Ok(Arc::new(tier))
        }
        #[cfg(not(feature = "redis"))]
        FastTierType::Redis => {
            error!("Redis ledger tier requested but 'redis' feature is not enabled");
            Err("Redis feature not enabled".into())
        }
    }
}
