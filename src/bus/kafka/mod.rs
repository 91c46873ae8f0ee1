//! Kafka transport for external events.
//!
//! Subscribes to one topic per event kind (`rating-update`,
//! `vote-count-update`, optionally prefixed) as a consumer group. Auto
//! commit is off: each message's offset is committed only after the
//! handler has returned for it, so a crash mid-message means redelivery.
//!
//! The stream is fanned out to one worker task per (topic, partition),
//! fed by a bounded mpsc channel, so a slow partition does not hold up the
//! others while order within a partition is kept.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message as KafkaMessage};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{BusError, Delivery, DeliveryHandler, Result, Transport};
use crate::config::KafkaConfig;

/// Build a ClientConfig for the consumer group.
fn build_consumer_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", &config.bootstrap_servers);
    client.set("group.id", &config.group_id);
    client.set("enable.auto.commit", "false");
    client.set("auto.offset.reset", "earliest");

    apply_security_config(config, &mut client);
    client
}

/// Apply security settings to a ClientConfig.
fn apply_security_config(config: &KafkaConfig, client: &mut ClientConfig) {
    if let Some(ref protocol) = config.security_protocol {
        client.set("security.protocol", protocol);
    }
    if let Some(ref mechanism) = config.sasl_mechanism {
        client.set("sasl.mechanism", mechanism);
    }
    if let Some(ref username) = config.sasl_username {
        client.set("sasl.username", username);
    }
    if let Some(ref password) = config.sasl_password {
        client.set("sasl.password", password);
    }
    if let Some(ref ca_location) = config.ssl_ca_location {
        client.set("ssl.ca.location", ca_location);
    }
}

/// Copy a borrowed Kafka message into an owned delivery.
fn to_delivery(message: &BorrowedMessage<'_>) -> Delivery {
    let received_at = message
        .timestamp()
        .to_millis()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Delivery {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        received_at,
    }
}

/// Kafka consumer-group transport.
pub struct KafkaTransport {
    config: KafkaConfig,
    consumer: Arc<StreamConsumer>,
}

impl KafkaTransport {
    /// Create the consumer. Does not subscribe until `run`.
    pub fn new(config: KafkaConfig) -> Result<Self> {
        let consumer: StreamConsumer = build_consumer_config(&config)
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            group_id = %config.group_id,
            "Connected to Kafka"
        );

        Ok(Self {
            config,
            consumer: Arc::new(consumer),
        })
    }

    fn spawn_worker(
        &self,
        topic: String,
        partition: i32,
        handler: Arc<dyn DeliveryHandler>,
    ) -> (mpsc::Sender<Delivery>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Delivery>(self.config.partition_buffer.max(1));
        let consumer = Arc::clone(&self.consumer);

        let handle = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                handler.on_delivery(&delivery).await;

                let mut offsets = TopicPartitionList::new();
                let committed = offsets
                    .add_partition_offset(
                        &delivery.topic,
                        delivery.partition,
                        Offset::Offset(delivery.offset + 1),
                    )
                    .and_then(|_| consumer.commit(&offsets, CommitMode::Async));
                if let Err(e) = committed {
                    error!(
                        topic = %delivery.topic,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        error = %e,
                        "Failed to commit offset"
                    );
                }
            }
            debug!(topic = %topic, partition, "Kafka partition worker stopped");
        });

        (tx, handle)
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn run(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let topics = self.config.topics();
        let topic_refs: Vec<&str> = topics.iter().map(|s| s.as_str()).collect();
        self.consumer
            .subscribe(&topic_refs)
            .map_err(|e| BusError::Subscribe(format!("Failed to subscribe to topics: {}", e)))?;

        info!(topics = ?topics, "Subscribed to Kafka topics");

        let mut workers: HashMap<(String, i32), (mpsc::Sender<Delivery>, JoinHandle<()>)> =
            HashMap::new();
        let mut stream = self.consumer.stream();

        while !*shutdown.borrow() {
            let message = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                message = stream.next() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            // Borrowed messages are not Send; copy out before the next await
            let delivery = match message {
                Ok(message) => to_delivery(&message),
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    continue;
                }
            };

            debug!(
                topic = %delivery.topic,
                partition = delivery.partition,
                offset = delivery.offset,
                "Received external event"
            );

            let slot = (delivery.topic.clone(), delivery.partition);
            let sender = match workers.get(&slot) {
                Some((sender, _)) => sender.clone(),
                None => {
                    let (sender, handle) =
                        self.spawn_worker(slot.0.clone(), slot.1, Arc::clone(&handler));
                    workers.insert(slot, (sender.clone(), handle));
                    sender
                }
            };

            if sender.send(delivery).await.is_err() {
                warn!("Kafka partition worker stopped unexpectedly");
            }
        }

        info!(workers = workers.len(), "Stopping Kafka consumer, draining workers");
        let handles: Vec<JoinHandle<()>> =
            workers.into_values().map(|(_, handle)| handle).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Kafka partition worker panicked");
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "kafka"
    }
}
