use super::*;
use crate::interfaces::ledger::EventKind;
use crate::storage::memory::MemoryLedgerTier;
use crate::storage::mock::MockLedgerTier;

struct Tiers {
    fast: Arc<MockLedgerTier>,
    durable: Arc<MockLedgerTier>,
    ledger: Arc<TieredLedger>,
}

fn tiers() -> Tiers {
    let fast = Arc::new(MockLedgerTier::new());
    let durable = Arc::new(MockLedgerTier::new());
    let ledger = Arc::new(TieredLedger::new(fast.clone(), durable.clone()));
    Tiers {
        fast,
        durable,
        ledger,
    }
}

fn key(k: &str) -> IdempotencyKey {
    IdempotencyKey::new(k, EventKind::RatingUpdate)
}

#[tokio::test]
async fn test_unseen_key_is_not_processed() {
    let t = tiers();
    assert!(!t.ledger.is_processed(&key("r-1")).await.unwrap());
}

#[tokio::test]
async fn test_claim_once_then_duplicate() {
    let t = tiers();
    assert!(t.ledger.try_claim(&key("r-55")).await.unwrap());
    assert!(!t.ledger.try_claim(&key("r-55")).await.unwrap());
    assert!(t.ledger.is_processed(&key("r-55")).await.unwrap());
    assert_eq!(t.durable.len().await, 1);
}

#[tokio::test]
async fn test_kinds_do_not_collide() {
    let t = tiers();
    t.ledger.mark_processed(&key("x")).await.unwrap();
    let vote = IdempotencyKey::new("x", EventKind::VoteCountUpdate);
    assert!(!t.ledger.is_processed(&vote).await.unwrap());
    assert!(t.ledger.try_claim(&vote).await.unwrap());
}

#[tokio::test]
async fn test_durable_hit_survives_fast_tier_loss() {
    let t = tiers();
    t.ledger.mark_processed(&key("r-2")).await.unwrap();

    // Simulate fast-tier eviction or a restart with a fresh fast tier
    let fresh = TieredLedger::new(Arc::new(MemoryLedgerTier::new()), t.durable.clone());
    assert!(fresh.is_processed(&key("r-2")).await.unwrap());
    assert!(!fresh.try_claim(&key("r-2")).await.unwrap());
}

#[tokio::test]
async fn test_fast_tier_failure_is_bypassed() {
    let t = tiers();
    t.fast.set_unavailable(true).await;

    assert!(t.ledger.try_claim(&key("r-3")).await.unwrap());
    assert!(t.ledger.is_processed(&key("r-3")).await.unwrap());
    assert!(!t.ledger.try_claim(&key("r-3")).await.unwrap());
}

#[tokio::test]
async fn test_durable_tier_failure_is_returned() {
    let t = tiers();
    t.durable.set_unavailable(true).await;

    assert!(t.ledger.try_claim(&key("r-4")).await.is_err());
    assert!(t.ledger.is_processed(&key("r-4")).await.is_err());
}

#[tokio::test]
async fn test_release_allows_reclaim() {
    let t = tiers();
    assert!(t.ledger.try_claim(&key("r-5")).await.unwrap());

    t.ledger.release(&key("r-5")).await.unwrap();

    assert!(!t.ledger.is_processed(&key("r-5")).await.unwrap());
    assert!(t.ledger.try_claim(&key("r-5")).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_claims_single_winner() {
    let t = tiers();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = Arc::clone(&t.ledger);
            tokio::spawn(async move { ledger.try_claim(&key("dup")).await.unwrap() })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(t.durable.len().await, 1);
}

#[tokio::test]
async fn test_purge_expired_clears_both_tiers() {
    let fast = Arc::new(MemoryLedgerTier::new());
    let durable = Arc::new(MemoryLedgerTier::new());
    let ledger = TieredLedger::new(fast.clone(), durable.clone())
        .with_fast_ttl(Duration::from_millis(10))
        .with_retention(Duration::from_millis(10));

    ledger.mark_processed(&key("old")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(ledger.purge_expired().await.unwrap(), 2);
    assert!(fast.is_empty().await);
    assert!(durable.is_empty().await);
}

#[tokio::test]
async fn test_purge_task_stops_on_shutdown() {
    let t = tiers();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = Arc::clone(&t.ledger).spawn_purge_task(Duration::from_millis(5), shutdown_rx);
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_failed_fast_remove_keeps_durable_claim() {
    let t = tiers();
    assert!(t.ledger.try_claim(&key("r-held")).await.unwrap());
    t.fast.set_fail_on_remove(true).await;

    assert!(t.ledger.release(&key("r-held")).await.is_err());
    assert_eq!(t.durable.len().await, 1);

    t.fast.set_fail_on_remove(false).await;
    t.ledger.release(&key("r-held")).await.unwrap();
    assert!(!t.ledger.is_processed(&key("r-held")).await.unwrap());
}
