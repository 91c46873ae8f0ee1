//! LedgerTier interface tests.
//!
//! These tests verify the contract of the LedgerTier trait. Keys are
//! namespaced by `prefix` so runs against a shared server do not collide.

use std::time::Duration;

use futures::future::join_all;

use folio::interfaces::{EventKind, IdempotencyKey, IdempotencyRecord, LedgerTier};

const TTL: Duration = Duration::from_secs(60);

fn key(prefix: &str, name: &str) -> IdempotencyKey {
    IdempotencyKey::new(format!("{}-{}", prefix, name), EventKind::RatingUpdate)
}

// =============================================================================
// insert_if_absent / contains
// =============================================================================

pub async fn test_unseen_key_absent<T: LedgerTier>(tier: &T, prefix: &str) {
    let present = tier
        .contains(&key(prefix, "unseen"))
        .await
        .expect("contains should succeed");
    assert!(!present, "unseen key should be absent");
}

pub async fn test_insert_then_contains<T: LedgerTier>(tier: &T, prefix: &str) {
    let k = key(prefix, "r-55");

    let inserted = tier
        .insert_if_absent(&IdempotencyRecord::now(k.clone()), TTL)
        .await
        .expect("insert should succeed");

    assert!(inserted, "first insert should win");
    assert!(tier.contains(&k).await.unwrap(), "inserted key should be present");
}

pub async fn test_second_insert_loses<T: LedgerTier>(tier: &T, prefix: &str) {
    let record = IdempotencyRecord::now(key(prefix, "twice"));

    assert!(tier.insert_if_absent(&record, TTL).await.unwrap());
    assert!(
        !tier.insert_if_absent(&record, TTL).await.unwrap(),
        "second insert should report an existing marker"
    );
}

pub async fn test_kinds_isolated<T: LedgerTier>(tier: &T, prefix: &str) {
    let rating = key(prefix, "shared");
    let votes = IdempotencyKey::new(rating.key.clone(), EventKind::VoteCountUpdate);

    assert!(tier
        .insert_if_absent(&IdempotencyRecord::now(rating), TTL)
        .await
        .unwrap());
    assert!(!tier.contains(&votes).await.unwrap());
    assert!(tier
        .insert_if_absent(&IdempotencyRecord::now(votes), TTL)
        .await
        .unwrap());
}

pub async fn test_remove_allows_reinsert<T: LedgerTier>(tier: &T, prefix: &str) {
    let record = IdempotencyRecord::now(key(prefix, "released"));

    assert!(tier.insert_if_absent(&record, TTL).await.unwrap());
    tier.remove(&record.key).await.expect("remove should succeed");

    assert!(!tier.contains(&record.key).await.unwrap());
    assert!(tier.insert_if_absent(&record, TTL).await.unwrap());
}

pub async fn test_remove_missing_is_ok<T: LedgerTier>(tier: &T, prefix: &str) {
    tier.remove(&key(prefix, "never"))
        .await
        .expect("removing an absent key should succeed");
}

// =============================================================================
// Expiry
// =============================================================================

pub async fn test_expired_marker_absent<T: LedgerTier>(tier: &T, prefix: &str) {
    let record = IdempotencyRecord::now(key(prefix, "short"));

    assert!(tier
        .insert_if_absent(&record, Duration::from_secs(1))
        .await
        .unwrap());
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(!tier.contains(&record.key).await.unwrap(), "expired key should be absent");
    assert!(
        tier.insert_if_absent(&record, TTL).await.unwrap(),
        "expired key should be claimable again"
    );
}

// =============================================================================
// Concurrency
// =============================================================================

pub async fn test_concurrent_inserts_single_winner<T: LedgerTier>(tier: &T, prefix: &str) {
    let record = IdempotencyRecord::now(key(prefix, "race"));

    let results = join_all((0..8).map(|_| tier.insert_if_absent(&record, TTL))).await;

    let winners = results
        .into_iter()
        .map(|r| r.expect("insert should succeed"))
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1, "exactly one concurrent insert should win");
}

/// Run all LedgerTier tests.
#[macro_export]
macro_rules! run_ledger_tier_tests {
    ($tier:expr, $prefix:expr) => {
        use $crate::storage::ledger_tier_tests::*;

        test_unseen_key_absent($tier, $prefix).await;
        println!("  test_unseen_key_absent: PASSED");

        test_insert_then_contains($tier, $prefix).await;
        println!("  test_insert_then_contains: PASSED");

        test_second_insert_loses($tier, $prefix).await;
        println!("  test_second_insert_loses: PASSED");

        test_kinds_isolated($tier, $prefix).await;
        println!("  test_kinds_isolated: PASSED");

        test_remove_allows_reinsert($tier, $prefix).await;
        println!("  test_remove_allows_reinsert: PASSED");

        test_remove_missing_is_ok($tier, $prefix).await;
        println!("  test_remove_missing_is_ok: PASSED");

        test_expired_marker_absent($tier, $prefix).await;
        println!("  test_expired_marker_absent: PASSED");

        test_concurrent_inserts_single_winner($tier, $prefix).await;
        println!("  test_concurrent_inserts_single_winner: PASSED");
    };
}
