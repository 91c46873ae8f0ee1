//! Redis storage implementations.

mod cache_store;
mod ledger_tier;

pub use cache_store::RedisCacheStore;
pub use ledger_tier::RedisLedgerTier;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::cache_store::ttl_secs;

    #[test]
    fn test_ttl_secs_never_zero() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(600)), 600);
    }
}
