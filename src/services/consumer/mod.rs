//! External event consumer.
//!
//! Applies rating and vote-count overwrites delivered at-least-once by a
//! [`Transport`](crate::bus::Transport). Exactly-once effect comes from the
//! idempotency ledger, not the transport:
//!
//! 1. parse and validate the payload (malformed is permanent, no retry)
//! 2. derive the idempotency key
//! 3. fast duplicate check
//! 4. claim the key in the ledger (the dedup gate)
//! 5. apply the overwrite; on failure release the claim
//! 6. invalidate the work's cache entries
//!
//! Steps 3-5 are retried on transient failures with a fixed delay. Whatever
//! the outcome, `handle` returns and the transport acknowledges.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use backon::Retryable;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::bus::{Delivery, DeliveryHandler};
use crate::interfaces::aggregate_store::{AggregateStore, StorageError};
use crate::interfaces::ledger::{EventKind, IdempotencyKey, IdempotencyLedger, LedgerError};
use crate::model::{ExternalUpdate, WorkId};
use crate::services::cache::CacheCoordinator;
use crate::utils::retry::RetryPolicy;

/// Highest accepted average rating.
pub const MAX_RATING: f64 = 5.0;

/// Payload of a `rating-update` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingUpdatePayload {
    pub work_id: i64,
    pub avg_rating: f64,
    pub review_count: i32,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Payload of a `vote-count-update` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCountPayload {
    pub work_id: i64,
    pub vote_count: i32,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// A delivery that can never be applied, however often it is retried.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("No event kind for topic '{0}'")]
    UnknownTopic(String),

    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure of one processing attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("Store error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ConsumerError {
    /// Whether another attempt could succeed.
    ///
    /// Ledger failures are always transient: the durable tier is the dedup
    /// gate and is expected back.
    pub fn is_transient(&self) -> bool {
        match self {
            ConsumerError::Payload(_) => false,
            ConsumerError::Storage(e) => e.is_transient(),
            ConsumerError::Ledger(_) => true,
        }
    }
}

/// A validated external event, ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalEvent {
    pub kind: EventKind,
    pub work_id: WorkId,
    pub update: ExternalUpdate,
    pub key: IdempotencyKey,
    /// The key was derived from the work id and receipt time.
    pub synthesized_key: bool,
}

impl ExternalEvent {
    /// Parse and validate a delivery.
    pub fn parse(delivery: &Delivery) -> Result<Self, PayloadError> {
        let kind = delivery
            .kind()
            .ok_or_else(|| PayloadError::UnknownTopic(delivery.topic.clone()))?;

        let (work_id, update, supplied_key) = match kind {
            EventKind::RatingUpdate => {
                let p: RatingUpdatePayload = serde_json::from_slice(&delivery.payload)?;
                if !p.avg_rating.is_finite() || !(0.0..=MAX_RATING).contains(&p.avg_rating) {
                    return Err(PayloadError::Invalid {
                        field: "avgRating",
                        reason: format!("{} is outside 0..={}", p.avg_rating, MAX_RATING),
                    });
                }
                non_negative("reviewCount", p.review_count)?;
                (
                    p.work_id,
                    ExternalUpdate::Rating {
                        avg_rating: p.avg_rating,
                        review_count: p.review_count,
                    },
                    p.idempotency_key,
                )
            }
            EventKind::VoteCountUpdate => {
                let p: VoteCountPayload = serde_json::from_slice(&delivery.payload)?;
                non_negative("voteCount", p.vote_count)?;
                (
                    p.work_id,
                    ExternalUpdate::VoteCount {
                        vote_count: p.vote_count,
                    },
                    p.idempotency_key,
                )
            }
        };

        if work_id <= 0 {
            return Err(PayloadError::Invalid {
                field: "workId",
                reason: format!("{} is not a valid id", work_id),
            });
        }
        let work_id = WorkId(work_id);

        let (key, synthesized_key) = match supplied_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => (key, false),
            None => (fallback_key(work_id, delivery), true),
        };

        Ok(Self {
            kind,
            work_id,
            update,
            key: IdempotencyKey::new(key, kind),
            synthesized_key,
        })
    }
}

fn non_negative(field: &'static str, value: i32) -> Result<(), PayloadError> {
    if value < 0 {
        return Err(PayloadError::Invalid {
            field,
            reason: format!("{} is negative", value),
        });
    }
    Ok(())
}

/// Key for events that arrive without one: work id plus receipt time in
/// epoch milliseconds.
///
/// Weak: a redelivery received at a different millisecond gets a different
/// key and is applied again. Overwrites make that harmless for the current
/// payload kinds.
pub fn fallback_key(work_id: WorkId, delivery: &Delivery) -> String {
    format!("{}-{}", work_id, delivery.received_at.timestamp_millis())
}

/// Final outcome of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The overwrite was applied and recorded.
    Applied,
    /// Already applied; nothing changed.
    Duplicate,
    /// Permanently unprocessable; discarded without retry.
    Rejected,
    /// Still failing after the last attempt; dropped.
    Exhausted,
}

/// Per-disposition counters.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    applied: AtomicU64,
    duplicate: AtomicU64,
    rejected: AtomicU64,
    exhausted: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub applied: u64,
    pub duplicate: u64,
    pub rejected: u64,
    pub exhausted: u64,
}

impl ConsumerStats {
    fn record(&self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Applied => &self.applied,
            Disposition::Duplicate => &self.duplicate,
            Disposition::Rejected => &self.rejected,
            Disposition::Exhausted => &self.exhausted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Applied,
    Duplicate,
}

/// Applies external rating and vote-count events exactly once in effect.
pub struct ExternalEventConsumer {
    store: Arc<dyn AggregateStore>,
    ledger: Arc<dyn IdempotencyLedger>,
    cache: Arc<CacheCoordinator>,
    policy: RetryPolicy,
    stats: ConsumerStats,
}

impl ExternalEventConsumer {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        ledger: Arc<dyn IdempotencyLedger>,
        cache: Arc<CacheCoordinator>,
    ) -> Self {
        Self {
            store,
            ledger,
            cache,
            policy: RetryPolicy::default(),
            stats: ConsumerStats::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Process one delivery to a final disposition.
    #[tracing::instrument(
        name = "consumer.handle",
        skip_all,
        fields(topic = %delivery.topic, partition = delivery.partition, offset = delivery.offset)
    )]
    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        let disposition = match ExternalEvent::parse(delivery) {
            Ok(event) => self.process(&event).await,
            Err(e) => {
                warn!(error = %e, "Discarding malformed event");
                Disposition::Rejected
            }
        };
        self.stats.record(disposition);
        disposition
    }

    async fn process(&self, event: &ExternalEvent) -> Disposition {
        if event.synthesized_key {
            warn!(
                work_id = %event.work_id,
                key = %event.key,
                "Event has no idempotency key, using receipt-time fallback"
            );
        }

        // Set while this delivery holds a claim that could not be released
        let holding = AtomicBool::new(false);

        let result = (|| async { self.attempt(event, &holding).await })
            .retry(self.policy.backoff())
            .when(|e: &ConsumerError| e.is_transient())
            .notify(|e: &ConsumerError, delay| {
                warn!(
                    key = %event.key,
                    error = %e,
                    retry_in = ?delay,
                    "Transient failure, retrying"
                );
            })
            .await;

        match result {
            Ok(Attempt::Applied) => {
                self.cache.invalidate_work(event.work_id).await;
                info!(work_id = %event.work_id, key = %event.key, "Applied external event");
                Disposition::Applied
            }
            Ok(Attempt::Duplicate) => {
                debug!(work_id = %event.work_id, key = %event.key, "Duplicate event, skipping");
                Disposition::Duplicate
            }
            Err(e) => {
                if holding.load(Ordering::SeqCst) {
                    self.release(&event.key, &holding).await;
                }
                if e.is_transient() {
                    error!(
                        work_id = %event.work_id,
                        key = %event.key,
                        attempts = self.policy.max_attempts,
                        error = %e,
                        "Dropping event after exhausting retries"
                    );
                    Disposition::Exhausted
                } else {
                    warn!(
                        work_id = %event.work_id,
                        key = %event.key,
                        error = %e,
                        "Discarding event with permanent failure"
                    );
                    Disposition::Rejected
                }
            }
        }
    }

    async fn attempt(
        &self,
        event: &ExternalEvent,
        holding: &AtomicBool,
    ) -> Result<Attempt, ConsumerError> {
        if !holding.load(Ordering::SeqCst) {
            if self.ledger.is_processed(&event.key).await? {
                return Ok(Attempt::Duplicate);
            }
            if !self.ledger.try_claim(&event.key).await? {
                return Ok(Attempt::Duplicate);
            }
            holding.store(true, Ordering::SeqCst);
        }

        match self
            .store
            .apply_external_update(event.work_id, &event.update)
            .await
        {
            Ok(()) => {
                holding.store(false, Ordering::SeqCst);
                Ok(Attempt::Applied)
            }
            Err(e) => {
                self.release(&event.key, holding).await;
                Err(e.into())
            }
        }
    }

    /// Drop a claim after a failed apply. A failed release keeps `holding`
    /// set so the next attempt reuses the claim instead of reading it as a
    /// duplicate.
    async fn release(&self, key: &IdempotencyKey, holding: &AtomicBool) {
        match self.ledger.release(key).await {
            Ok(()) => holding.store(false, Ordering::SeqCst),
            Err(e) => warn!(key = %key, error = %e, "Failed to release idempotency claim"),
        }
    }
}

#[async_trait]
impl DeliveryHandler for ExternalEventConsumer {
    async fn on_delivery(&self, delivery: &Delivery) {
        self.handle(delivery).await;
    }
}

#[cfg(test)]
mod tests;
