//! External event transport configuration types.

use serde::Deserialize;

use crate::interfaces::EventKind;

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process partitioned channels (no external broker).
    #[default]
    Channel,
    /// Kafka consumer group.
    Kafka,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// In-process channel configuration.
    pub channel: ChannelConfig,
    /// Kafka-specific configuration.
    pub kafka: KafkaConfig,
}

/// In-process channel transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Number of partitions, each served by one worker.
    pub partitions: usize,
    /// Buffered deliveries per partition before publishers wait.
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            capacity: 1024,
        }
    }
}

/// Kafka-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Consumer group ID, scoped to this subsystem.
    pub group_id: String,
    /// Optional topic prefix; topics are `{prefix}.{kind}` when set.
    pub topic_prefix: Option<String>,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
    /// Buffered messages per partition worker.
    pub partition_buffer: usize,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "folio-statistics".to_string(),
            topic_prefix: None,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
            partition_buffer: 256,
        }
    }
}

impl KafkaConfig {
    /// Build the topic name for an event kind.
    pub fn topic_for_kind(&self, kind: EventKind) -> String {
        match &self.topic_prefix {
            Some(prefix) => format!("{}.{}", prefix, kind.as_str()),
            None => kind.as_str().to_string(),
        }
    }

    /// All topics this consumer subscribes to.
    pub fn topics(&self) -> Vec<String> {
        EventKind::ALL
            .into_iter()
            .map(|kind| self.topic_for_kind(kind))
            .collect()
    }
}
