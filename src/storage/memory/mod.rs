//! In-process implementations of the cache store and ledger tier.
//!
//! Used as the fast ledger tier and as the cache for single-process
//! deployments. No external dependencies.

mod cache_store;
mod ledger_tier;

pub use cache_store::MemoryCacheStore;
pub use ledger_tier::MemoryLedgerTier;

/// Match a key against a glob pattern where `*` matches any run of
/// characters (including none). No other metacharacters are recognised.
pub fn glob_matches(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    // split always yields at least one item
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // No wildcard: exact match
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
