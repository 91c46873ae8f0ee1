//! Event plumbing.
//!
//! This module contains:
//! - `LocalEventBus`: synchronous in-process bus that runs segment listeners
//!   inside the caller's unit of work
//! - `Transport` trait: at-least-once, partitioned delivery of external events
//! - Implementations: in-memory channels, Kafka

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::interfaces::{EventKind, StorageError};

pub mod channel;
#[cfg(feature = "kafka")]
pub mod kafka;
mod local;

pub use channel::ChannelTransport;
#[cfg(feature = "kafka")]
pub use kafka::KafkaTransport;
pub use local::{LocalEventBus, SegmentListener, SegmentSetChanged};

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Listener '{name}' failed: {source}")]
    ListenerFailed {
        name: String,
        #[source]
        source: StorageError,
    },
}

/// One message as received from an external transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl Delivery {
    /// Event kind routed by topic name.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_topic(&self.topic)
    }
}

/// Processes deliveries for a transport.
///
/// Returning means the delivery is done with, whatever the outcome: the
/// transport acknowledges it (commits the offset) afterwards.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn on_delivery(&self, delivery: &Delivery);
}

/// Source of external event deliveries.
///
/// Implementations run one worker per partition. Deliveries within a
/// partition are handled strictly in order; partitions run in parallel.
///
/// Implementations:
/// - `ChannelTransport`: in-memory partitions, for single-process use and tests
/// - `KafkaTransport`: Kafka consumer group with manual offset commits
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver messages to `handler` until `shutdown` flips to `true` or the
    /// source closes.
    async fn run(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()>;

    /// Human-readable transport name for logs.
    fn name(&self) -> &str;
}
