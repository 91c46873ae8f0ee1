//! In-memory partitioned transport for standalone mode.
//!
//! Uses one bounded tokio mpsc channel per partition, each drained by a
//! single worker, which gives the same ordering contract as a Kafka
//! consumer: in order within a partition, parallel across partitions.
//! Messages are routed to a partition by hashing their key.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info};

use super::{BusError, Delivery, DeliveryHandler, Result, Transport};
use crate::config::ChannelConfig;
use crate::interfaces::EventKind;

/// Per-partition offset bookkeeping.
#[derive(Default)]
struct PartitionOffsets {
    /// Next offset to assign to a published message.
    next: AtomicI64,
    /// Offset after the last handled message (Kafka commit semantics).
    committed: AtomicI64,
}

/// In-memory transport with Kafka-like partition semantics.
pub struct ChannelTransport {
    senders: Mutex<Vec<mpsc::Sender<Delivery>>>,
    receivers: Mutex<Option<Vec<mpsc::Receiver<Delivery>>>>,
    offsets: Arc<Vec<PartitionOffsets>>,
    partitions: usize,
}

impl ChannelTransport {
    /// Create a transport with `config.partitions` partitions.
    pub fn new(config: &ChannelConfig) -> Self {
        let partitions = config.partitions.max(1);
        let capacity = config.capacity.max(1);

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..partitions).map(|_| mpsc::channel::<Delivery>(capacity)).unzip();
        let offsets: Vec<PartitionOffsets> =
            (0..partitions).map(|_| PartitionOffsets::default()).collect();

        info!(partitions, capacity, "Channel transport initialized");

        Self {
            senders: Mutex::new(senders),
            receivers: Mutex::new(Some(receivers)),
            offsets: Arc::new(offsets),
            partitions,
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Partition a message key is routed to. Keyless messages go to 0.
    pub fn partition_for(&self, key: Option<&str>) -> usize {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions as u64) as usize
            }
            None => 0,
        }
    }

    /// Publish a payload on the topic for `kind`, keyed by `key`.
    ///
    /// Returns the assigned (partition, offset).
    pub async fn publish(
        &self,
        kind: EventKind,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<(i32, i64)> {
        let partition = self.partition_for(key);
        let offset = self.offsets[partition].next.fetch_add(1, Ordering::SeqCst);

        let delivery = Delivery {
            topic: kind.as_str().to_string(),
            partition: partition as i32,
            offset,
            key: key.map(str::to_string),
            payload,
            received_at: Utc::now(),
        };
        self.send(delivery).await?;
        Ok((partition as i32, offset))
    }

    /// Deliver an already-seen message again, as a broker does after a
    /// consumer crash or rebalance. Keeps the original offset.
    pub async fn redeliver(&self, mut delivery: Delivery) -> Result<()> {
        delivery.received_at = Utc::now();
        self.send(delivery).await
    }

    /// Offset after the last handled message on a partition.
    pub fn committed_offset(&self, partition: usize) -> i64 {
        self.offsets
            .get(partition)
            .map(|o| o.committed.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Stop accepting messages. Workers drain what is queued, then `run`
    /// returns.
    pub async fn close(&self) {
        self.senders.lock().await.clear();
    }

    async fn send(&self, delivery: Delivery) -> Result<()> {
        let partition = delivery.partition as usize;
        let sender = {
            let senders = self.senders.lock().await;
            senders
                .get(partition)
                .cloned()
                .ok_or_else(|| BusError::Publish("transport closed".to_string()))?
        };

        debug!(
            topic = %delivery.topic,
            partition,
            offset = delivery.offset,
            "Publishing to channel partition"
        );
        sender
            .send(delivery)
            .await
            .map_err(|_| BusError::Publish("partition worker stopped".to_string()))
    }
}

async fn run_partition(
    partition: usize,
    mut receiver: mpsc::Receiver<Delivery>,
    handler: Arc<dyn DeliveryHandler>,
    offsets: Arc<Vec<PartitionOffsets>>,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        let delivery = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            delivery = receiver.recv() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };

        handler.on_delivery(&delivery).await;
        offsets[partition]
            .committed
            .fetch_max(delivery.offset + 1, Ordering::SeqCst);
    }
    debug!(partition, "Channel partition worker stopped");
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn run(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let receivers = self
            .receivers
            .lock()
            .await
            .take()
            .ok_or_else(|| BusError::Subscribe("channel transport already running".to_string()))?;

        info!(partitions = self.partitions, "Channel consumer started");

        let workers: Vec<_> = receivers
            .into_iter()
            .enumerate()
            .map(|(partition, receiver)| {
                tokio::spawn(run_partition(
                    partition,
                    receiver,
                    Arc::clone(&handler),
                    Arc::clone(&self.offsets),
                    shutdown.clone(),
                ))
            })
            .collect();

        for worker in futures::future::join_all(workers).await {
            if let Err(e) = worker {
                return Err(BusError::Subscribe(format!("partition worker panicked: {}", e)));
            }
        }

        info!("Channel consumer stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests;
