//! Retry utilities: backoff builders for the consumer and for startup
//! connections.
//!
//! Uses `backon` so callers compose `.retry(..).when(..).notify(..)` at the
//! call site instead of hand-writing loops.

use std::time::Duration;

use backon::{ConstantBuilder, ExponentialBuilder};

/// Fixed-delay retry policy for applying one external event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never less than one.
    pub max_attempts: u32,
    /// Delay between consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Backoff for this policy.
    ///
    /// `backon` counts retries after the first call, so `max_attempts = 3`
    /// becomes two retries.
    pub fn backoff(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.retries())
    }

    /// Number of retries after the first attempt.
    pub fn retries(&self) -> usize {
        self.max_attempts.saturating_sub(1) as usize
    }
}

/// Backoff for connecting to the database, Redis or Kafka at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}
