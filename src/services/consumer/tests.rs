use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use super::*;
use crate::services::cache::CacheNamespace;
use crate::services::ledger::TieredLedger;
use crate::storage::memory::{MemoryCacheStore, MemoryLedgerTier};
use crate::storage::mock::{MockAggregateStore, MockLedgerTier};

const RATING: &str = "rating-update";
const VOTES: &str = "vote-count-update";

struct Harness {
    store: Arc<MockAggregateStore>,
    durable: Arc<MockLedgerTier>,
    cache_store: Arc<MemoryCacheStore>,
    cache: Arc<CacheCoordinator>,
    consumer: Arc<ExternalEventConsumer>,
    work_id: WorkId,
}

async fn harness() -> Harness {
    let store = Arc::new(MockAggregateStore::new());
    let work_id = store.create_work("Ember Tide").await.unwrap().id;
    let durable = Arc::new(MockLedgerTier::new());
    let ledger = Arc::new(TieredLedger::new(
        Arc::new(MemoryLedgerTier::new()),
        durable.clone(),
    ));
    let cache_store = Arc::new(MemoryCacheStore::new());
    let cache = Arc::new(CacheCoordinator::new(cache_store.clone(), "folio"));
    let consumer = ExternalEventConsumer::new(store.clone(), ledger, cache.clone())
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        });
    Harness {
        store,
        durable,
        cache_store,
        cache,
        consumer: Arc::new(consumer),
        work_id,
    }
}

fn delivery(topic: &str, payload: serde_json::Value) -> Delivery {
    Delivery {
        topic: topic.to_string(),
        partition: 0,
        offset: 0,
        key: None,
        payload: serde_json::to_vec(&payload).unwrap(),
        received_at: Utc::now(),
    }
}

fn rating(work_id: WorkId, avg: f64, reviews: i32, key: &str) -> Delivery {
    delivery(
        RATING,
        json!({
            "workId": work_id.0,
            "avgRating": avg,
            "reviewCount": reviews,
            "idempotencyKey": key,
        }),
    )
}

async fn work(h: &Harness) -> crate::model::Work {
    h.store.read_work(h.work_id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_rating_update_applied() {
    let h = harness().await;

    let disposition = h.consumer.handle(&rating(h.work_id, 4.2, 10, "r-55")).await;

    assert_eq!(disposition, Disposition::Applied);
    let w = work(&h).await;
    assert_eq!(w.avg_rating, 4.2);
    assert_eq!(w.review_count, 10);
}

#[tokio::test]
async fn test_same_key_applied_once() {
    let h = harness().await;
    let event = rating(h.work_id, 4.2, 10, "r-55");

    assert_eq!(h.consumer.handle(&event).await, Disposition::Applied);
    assert_eq!(h.consumer.handle(&event).await, Disposition::Duplicate);

    assert_eq!(h.store.applied_count(), 1);
    assert_eq!(h.durable.len().await, 1);
    let w = work(&h).await;
    assert_eq!((w.avg_rating, w.review_count), (4.2, 10));
}

#[tokio::test]
async fn test_vote_count_update_applied() {
    let h = harness().await;
    let event = delivery(
        VOTES,
        json!({ "workId": h.work_id.0, "voteCount": 321, "idempotencyKey": "v-1" }),
    );

    assert_eq!(h.consumer.handle(&event).await, Disposition::Applied);
    assert_eq!(work(&h).await.vote_count, 321);
}

#[tokio::test]
async fn test_kinds_have_separate_key_spaces() {
    let h = harness().await;
    let votes = delivery(
        VOTES,
        json!({ "workId": h.work_id.0, "voteCount": 3, "idempotencyKey": "same" }),
    );

    assert_eq!(
        h.consumer.handle(&rating(h.work_id, 3.0, 1, "same")).await,
        Disposition::Applied
    );
    assert_eq!(h.consumer.handle(&votes).await, Disposition::Applied);
}

#[tokio::test]
async fn test_prefixed_topic_routes_by_suffix() {
    let h = harness().await;
    let mut event = rating(h.work_id, 1.5, 2, "r-prefixed");
    event.topic = "prod.rating-update".to_string();

    assert_eq!(h.consumer.handle(&event).await, Disposition::Applied);
}

#[tokio::test]
async fn test_malformed_payloads_rejected_without_retry() {
    let h = harness().await;

    let cases = vec![
        Delivery {
            payload: b"{not json".to_vec(),
            ..rating(h.work_id, 1.0, 1, "m-1")
        },
        delivery(RATING, json!({ "workId": h.work_id.0, "reviewCount": 1 })),
        rating(h.work_id, 7.5, 1, "m-2"),
        rating(h.work_id, 4.0, -1, "m-3"),
        delivery(VOTES, json!({ "workId": h.work_id.0, "voteCount": -4 })),
        delivery(VOTES, json!({ "workId": 0, "voteCount": 4 })),
        delivery("comments", json!({ "workId": h.work_id.0 })),
    ];

    for case in &cases {
        assert_eq!(h.consumer.handle(case).await, Disposition::Rejected);
    }

    assert!(h.durable.is_empty().await);
    assert_eq!(h.store.applied_count(), 0);
    assert_eq!(h.consumer.stats().rejected, cases.len() as u64);
}

#[test]
fn test_non_finite_rating_rejected() {
    let event = Delivery {
        payload: br#"{"workId": 1, "avgRating": 1e400, "reviewCount": 1}"#.to_vec(),
        ..delivery(RATING, json!({}))
    };
    assert!(ExternalEvent::parse(&event).is_err());
}

#[tokio::test]
async fn test_transient_failure_retried_then_applied() {
    let h = harness().await;
    h.store.fail_next_applies(2);

    let disposition = h.consumer.handle(&rating(h.work_id, 2.5, 4, "r-retry")).await;

    assert_eq!(disposition, Disposition::Applied);
    assert_eq!(h.store.applied_count(), 1);
    assert_eq!(h.durable.len().await, 1);
}

#[tokio::test]
async fn test_exhausted_event_releases_claim() {
    let h = harness().await;
    h.store.fail_next_applies(3);
    let event = rating(h.work_id, 2.5, 4, "r-exhaust");

    assert_eq!(h.consumer.handle(&event).await, Disposition::Exhausted);
    assert!(h.durable.is_empty().await);
    assert_eq!(work(&h).await.review_count, 0);

    // Redelivery is not mistaken for a duplicate
    assert_eq!(h.consumer.handle(&event).await, Disposition::Applied);
}

#[tokio::test]
async fn test_missing_work_is_permanent() {
    let h = harness().await;

    let disposition = h.consumer.handle(&rating(WorkId(999), 3.0, 1, "r-404")).await;

    assert_eq!(disposition, Disposition::Rejected);
    assert!(h.durable.is_empty().await);
}

#[tokio::test]
async fn test_durable_ledger_outage_exhausts_without_applying() {
    let h = harness().await;
    h.durable.set_unavailable(true).await;

    let disposition = h.consumer.handle(&rating(h.work_id, 3.0, 1, "r-down")).await;

    assert_eq!(disposition, Disposition::Exhausted);
    assert_eq!(h.store.applied_count(), 0);
}

#[tokio::test]
async fn test_failed_release_keeps_claim_for_next_attempt() {
    let h = harness().await;
    h.durable.set_fail_on_remove(true).await;
    h.store.fail_next_applies(1);

    let disposition = h.consumer.handle(&rating(h.work_id, 3.3, 3, "r-held")).await;

    assert_eq!(disposition, Disposition::Applied);
    assert_eq!(work(&h).await.avg_rating, 3.3);
    assert_eq!(h.durable.len().await, 1);
}

#[tokio::test]
async fn test_missing_key_uses_receipt_time_fallback() {
    let h = harness().await;
    let mut event = delivery(VOTES, json!({ "workId": h.work_id.0, "voteCount": 8 }));
    event.received_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();

    let parsed = ExternalEvent::parse(&event).unwrap();
    assert!(parsed.synthesized_key);
    assert_eq!(parsed.key.key, format!("{}-1700000000123", h.work_id));

    assert_eq!(h.consumer.handle(&event).await, Disposition::Applied);
    assert_eq!(h.consumer.handle(&event).await, Disposition::Duplicate);
}

#[tokio::test]
async fn test_blank_key_treated_as_missing() {
    let h = harness().await;
    let event = rating(h.work_id, 1.0, 1, "   ");
    assert!(ExternalEvent::parse(&event).unwrap().synthesized_key);
}

#[tokio::test]
async fn test_concurrent_duplicates_apply_once() {
    let h = harness().await;
    h.store.set_apply_delay(Duration::from_millis(50));
    let event = rating(h.work_id, 4.8, 99, "r-race");

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let consumer = Arc::clone(&h.consumer);
            let event = event.clone();
            tokio::spawn(async move { consumer.handle(&event).await })
        })
        .collect();

    let mut dispositions = Vec::new();
    for handle in handles {
        dispositions.push(handle.await.unwrap());
    }

    assert_eq!(h.store.applied_count(), 1);
    assert_eq!(
        dispositions
            .iter()
            .filter(|d| **d == Disposition::Applied)
            .count(),
        1
    );
    assert_eq!(
        dispositions
            .iter()
            .filter(|d| **d == Disposition::Duplicate)
            .count(),
        4
    );
}

#[tokio::test]
async fn test_apply_invalidates_work_cache() {
    let h = harness().await;
    let key = h.cache.keys().work(h.work_id);
    h.cache.put(CacheNamespace::Work, &key, &work(&h).await).await;
    h.cache
        .put(CacheNamespace::Ranking, &h.cache.keys().ranking("top"), &vec![h.work_id])
        .await;

    h.consumer.handle(&rating(h.work_id, 4.0, 2, "r-cache")).await;

    assert!(h.cache_store.is_empty().await);
}

#[tokio::test]
async fn test_stats_snapshot() {
    let h = harness().await;
    let event = rating(h.work_id, 4.0, 2, "r-stats");

    h.consumer.handle(&event).await;
    h.consumer.handle(&event).await;
    h.consumer.handle(&rating(h.work_id, 9.0, 2, "r-bad")).await;

    assert_eq!(
        h.consumer.stats(),
        ConsumerStatsSnapshot {
            applied: 1,
            duplicate: 1,
            rejected: 1,
            exhausted: 0,
        }
    );
}

#[tokio::test]
async fn test_delivery_handler_delegates() {
    let h = harness().await;
    let handler: Arc<dyn DeliveryHandler> = h.consumer.clone();

    handler.on_delivery(&rating(h.work_id, 2.0, 5, "r-handler")).await;

    assert_eq!(h.consumer.stats().applied, 1);
}

#[test]
fn test_error_classification() {
    assert!(!ConsumerError::from(PayloadError::UnknownTopic("x".into())).is_transient());
    assert!(!ConsumerError::from(StorageError::WorkNotFound(WorkId(1))).is_transient());
    assert!(ConsumerError::from(StorageError::Unavailable("down".into())).is_transient());
    assert!(ConsumerError::from(LedgerError::Unavailable("down".into())).is_transient());
}

#[tokio::test]
async fn test_stuck_fast_marker_does_not_mask_retry() {
    let store = Arc::new(MockAggregateStore::new());
    let work_id = store.create_work("Ember Tide").await.unwrap().id;
    let fast = Arc::new(MockLedgerTier::new());
    fast.set_fail_on_remove(true).await;
    let durable = Arc::new(MemoryLedgerTier::new());
    let ledger = Arc::new(TieredLedger::new(fast, durable.clone()));
    let cache = Arc::new(CacheCoordinator::new(Arc::new(MemoryCacheStore::new()), "folio"));
    let consumer = ExternalEventConsumer::new(store.clone(), ledger, cache).with_retry_policy(
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        },
    );
    store.fail_next_applies(1);

    let disposition = consumer.handle(&rating(work_id, 4.2, 10, "r-55")).await;

    assert_eq!(disposition, Disposition::Applied);
    assert_eq!(store.applied_count(), 1);
    assert_eq!(durable.len().await, 1);
}
