//! Two-tier idempotency ledger.
//!
//! The durable tier's atomic insert-if-absent is the only dedup gate. The
//! fast tier is a read-latency shortcut for redeliveries seconds or minutes
//! apart: its markers expire quickly, its read and write failures are
//! logged and bypassed, and a fast-tier miss always falls through to the
//! durable tier. A release is the exception: it fails unless the fast
//! marker is gone, leaving the durable claim in place.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::interfaces::ledger::{
    IdempotencyKey, IdempotencyLedger, IdempotencyRecord, LedgerTier, Result,
};

/// Default lifetime of fast-tier markers.
pub const DEFAULT_FAST_TTL: Duration = Duration::from_secs(10 * 60);
/// Default lifetime of durable markers. Outlasts the transport's
/// redelivery window, including a rebalance replaying a long backlog.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Fast tier in front of a durable tier.
pub struct TieredLedger {
    fast: Arc<dyn LedgerTier>,
    durable: Arc<dyn LedgerTier>,
    fast_ttl: Duration,
    retention: Duration,
}

impl TieredLedger {
    pub fn new(fast: Arc<dyn LedgerTier>, durable: Arc<dyn LedgerTier>) -> Self {
        Self {
            fast,
            durable,
            fast_ttl: DEFAULT_FAST_TTL,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_fast_ttl(mut self, ttl: Duration) -> Self {
        self.fast_ttl = ttl;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Copy a marker into the fast tier. Best-effort.
    async fn warm(&self, key: &IdempotencyKey) {
        let record = IdempotencyRecord::now(key.clone());
        if let Err(e) = self.fast.insert_if_absent(&record, self.fast_ttl).await {
            warn!(
                key = %key,
                tier = self.fast.name(),
                error = %e,
                "Fast ledger tier write failed"
            );
        }
    }

    /// Delete expired markers from both tiers.
    ///
    /// Durable-tier failures are returned; fast-tier failures are logged.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();

        let fast = match self.fast.purge_expired(now).await {
            Ok(n) => n,
            Err(e) => {
                warn!(tier = self.fast.name(), error = %e, "Fast ledger tier purge failed");
                0
            }
        };
        let durable = self.durable.purge_expired(now).await?;

        if fast + durable > 0 {
            info!(fast, durable, "Purged expired idempotency markers");
        }
        Ok(fast + durable)
    }

    /// Run `purge_expired` every `every` until `shutdown` flips to `true`.
    pub fn spawn_purge_task(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval = ?every, "Starting idempotency ledger purge task");

            while !*shutdown.borrow() {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.purge_expired().await {
                            warn!(error = %e, "Idempotency ledger purge failed");
                        }
                    }
                }
            }

            debug!("Idempotency ledger purge task stopped");
        })
    }
}

#[async_trait]
impl IdempotencyLedger for TieredLedger {
    async fn is_processed(&self, key: &IdempotencyKey) -> Result<bool> {
        match self.fast.contains(key).await {
            Ok(true) => {
                debug!(key = %key, "Fast ledger tier hit");
                return Ok(true);
            }
            Ok(false) => {}
            Err(e) => warn!(
                key = %key,
                tier = self.fast.name(),
                error = %e,
                "Fast ledger tier read failed, falling back to durable tier"
            ),
        }

        let processed = self.durable.contains(key).await?;
        if processed {
            self.warm(key).await;
        }
        Ok(processed)
    }

    async fn mark_processed(&self, key: &IdempotencyKey) -> Result<()> {
        self.try_claim(key).await.map(|_| ())
    }

    async fn try_claim(&self, key: &IdempotencyKey) -> Result<bool> {
        let record = IdempotencyRecord::now(key.clone());
        let claimed = self.durable.insert_if_absent(&record, self.retention).await?;

        // Either way the key is now processed as far as readers are concerned
        self.warm(key).await;

        debug!(key = %key, claimed, "Idempotency claim");
        Ok(claimed)
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<()> {
        // A fast marker left behind would read as processed with no durable
        // claim, so the claim stays until the fast tier lets go of it.
        self.fast.remove(key).await.map_err(|e| {
            warn!(
                key = %key,
                tier = self.fast.name(),
                error = %e,
                "Fast ledger tier remove failed, keeping claim"
            );
            e
        })?;
        self.durable.remove(key).await?;

        debug!(key = %key, "Released idempotency claim");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
