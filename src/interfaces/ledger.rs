//! Idempotency ledger interfaces.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Kind of externally delivered event. Each kind has its own topic and its
/// own idempotency key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    RatingUpdate,
    VoteCountUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::RatingUpdate, EventKind::VoteCountUpdate];

    /// Stable name, used as the topic suffix and the ledger kind column.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RatingUpdate => "rating-update",
            EventKind::VoteCountUpdate => "vote-count-update",
        }
    }

    /// Resolve the kind from a stable name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Resolve the kind from a topic name, ignoring any dotted prefix
    /// (`prod.rating-update` is a rating update).
    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::from_name(topic.rsplit('.').next()?)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dedup identity of an external event: caller-supplied or synthesized key,
/// scoped by event kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub key: String,
    pub kind: EventKind,
}

impl IdempotencyKey {
    pub fn new(key: impl Into<String>, kind: EventKind) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// A processed-event marker.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub processed_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn now(key: IdempotencyKey) -> Self {
        Self {
            key,
            processed_at: Utc::now(),
        }
    }
}

/// One storage tier of the idempotency ledger.
///
/// Implementations:
/// - `MemoryLedgerTier`: in-process TTL map (fast tier)
/// - `RedisLedgerTier`: `SET NX EX` (fast or durable tier)
/// - `SqliteLedgerTier`: primary-key gated insert (durable tier)
#[async_trait]
pub trait LedgerTier: Send + Sync {
    /// Whether an unexpired marker exists.
    async fn contains(&self, key: &IdempotencyKey) -> Result<bool>;

    /// Insert a marker unless one already exists.
    ///
    /// Returns `true` if this call created the marker. Must be atomic: of two
    /// concurrent calls for the same key, exactly one returns `true`.
    async fn insert_if_absent(&self, record: &IdempotencyRecord, ttl: Duration) -> Result<bool>;

    /// Remove a marker.
    async fn remove(&self, key: &IdempotencyKey) -> Result<()>;

    /// Delete markers that expired at or before `now`. Returns the count.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Human-readable tier name for logs.
    fn name(&self) -> &str;
}

/// Record of which external events have already been applied.
///
/// `try_claim` is the dedup gate: of any number of concurrent claims for the
/// same key, exactly one returns `true`. Callers that fail to apply after a
/// successful claim must `release` it so redelivery can retry.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Whether the event has already been applied.
    async fn is_processed(&self, key: &IdempotencyKey) -> Result<bool>;

    /// Record the event as applied, whether or not it already was.
    async fn mark_processed(&self, key: &IdempotencyKey) -> Result<()>;

    /// Atomically record the event as applied if it is not already.
    ///
    /// Returns `true` if this call made the claim.
    async fn try_claim(&self, key: &IdempotencyKey) -> Result<bool>;

    /// Drop a claim whose apply failed.
    ///
    /// On error the claim may still be held and the caller still owns it.
    async fn release(&self, key: &IdempotencyKey) -> Result<()>;
}
