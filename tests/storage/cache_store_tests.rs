//! CacheStore interface tests.
//!
//! Keys are namespaced by `prefix` so runs against a shared server do not
//! collide.

use std::time::Duration;

use folio::interfaces::CacheStore;

const TTL: Duration = Duration::from_secs(60);

pub async fn test_get_missing<C: CacheStore>(cache: &C, prefix: &str) {
    let value = cache
        .get(&format!("{}:missing", prefix))
        .await
        .expect("get should succeed");
    assert!(value.is_none());
}

pub async fn test_set_and_get<C: CacheStore>(cache: &C, prefix: &str) {
    let key = format!("{}:work:1", prefix);

    cache
        .set(&key, b"{\"id\":1}".to_vec(), TTL)
        .await
        .expect("set should succeed");

    assert_eq!(cache.get(&key).await.unwrap(), Some(b"{\"id\":1}".to_vec()));
}

pub async fn test_set_overwrites<C: CacheStore>(cache: &C, prefix: &str) {
    let key = format!("{}:work:2", prefix);

    cache.set(&key, b"old".to_vec(), TTL).await.unwrap();
    cache.set(&key, b"new".to_vec(), TTL).await.unwrap();

    assert_eq!(cache.get(&key).await.unwrap(), Some(b"new".to_vec()));
}

pub async fn test_delete<C: CacheStore>(cache: &C, prefix: &str) {
    let key = format!("{}:work:3", prefix);
    cache.set(&key, b"v".to_vec(), TTL).await.unwrap();

    cache.delete(&key).await.expect("delete should succeed");
    cache.delete(&key).await.expect("deleting twice should succeed");

    assert!(cache.get(&key).await.unwrap().is_none());
}

pub async fn test_delete_matching<C: CacheStore>(cache: &C, prefix: &str) {
    for page in 0..3 {
        cache
            .set(&format!("{}:seglist:7:{}", prefix, page), b"p".to_vec(), TTL)
            .await
            .unwrap();
    }
    let other = format!("{}:seglist:70:0", prefix);
    cache.set(&other, b"p".to_vec(), TTL).await.unwrap();

    let removed = cache
        .delete_matching(&format!("{}:seglist:7:*", prefix))
        .await
        .expect("delete_matching should succeed");

    assert_eq!(removed, 3);
    assert!(cache.get(&other).await.unwrap().is_some(), "other work's pages survive");
}

pub async fn test_incr<C: CacheStore>(cache: &C, prefix: &str) {
    let key = format!("{}:views:1", prefix);

    assert_eq!(cache.incr(&key, TTL).await.unwrap(), 1);
    assert_eq!(cache.incr(&key, TTL).await.unwrap(), 2);
    assert_eq!(cache.incr(&key, TTL).await.unwrap(), 3);
}

pub async fn test_entry_expires<C: CacheStore>(cache: &C, prefix: &str) {
    let key = format!("{}:search:abc", prefix);
    cache
        .set(&key, b"hits".to_vec(), Duration::from_secs(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(cache.get(&key).await.unwrap().is_none(), "entry should expire");
}

/// Run all CacheStore tests.
#[macro_export]
macro_rules! run_cache_store_tests {
    ($cache:expr, $prefix:expr) => {
        use $crate::storage::cache_store_tests::*;

        test_get_missing($cache, $prefix).await;
        println!("  test_get_missing: PASSED");

        test_set_and_get($cache, $prefix).await;
        println!("  test_set_and_get: PASSED");

        test_set_overwrites($cache, $prefix).await;
        println!("  test_set_overwrites: PASSED");

        test_delete($cache, $prefix).await;
        println!("  test_delete: PASSED");

        test_delete_matching($cache, $prefix).await;
        println!("  test_delete_matching: PASSED");

        test_incr($cache, $prefix).await;
        println!("  test_incr: PASSED");

        test_entry_expires($cache, $prefix).await;
        println!("  test_entry_expires: PASSED");
    };
}
