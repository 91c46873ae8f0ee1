//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod cache;
mod consumer;
mod ledger;
mod messaging;
mod storage;

pub use cache::{CacheConfig, CacheType};
pub use consumer::ConsumerConfig;
pub use ledger::{FastTierType, LedgerConfig};
pub use messaging::{ChannelConfig, KafkaConfig, MessagingConfig, MessagingType};
pub use storage::StorageConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "folio.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FOLIO_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FOLIO";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FOLIO_LOG";
/// Environment variable selecting the log output format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "FOLIO_LOG_FORMAT";

use serde::Deserialize;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Aggregate store and durable ledger database.
    pub storage: StorageConfig,
    /// Read-through cache.
    pub cache: CacheConfig,
    /// Idempotency ledger tiers and retention.
    pub ledger: LedgerConfig,
    /// External event transport.
    pub messaging: MessagingConfig,
    /// External event retry policy.
    pub consumer: ConsumerConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `folio.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `FOLIO_CONFIG` environment variable (if set)
    /// 4. Environment variables with `FOLIO` prefix and `__` separator
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string, without file or env sources.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, File, FileFormat};

        let config: Config = ConfigLib::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the consumer misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "consumer.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.messaging.channel.partitions == 0 {
            return Err(ConfigError::Invalid(
                "messaging.channel.partitions must be at least 1".to_string(),
            ));
        }
        if self.ledger.retention_secs < self.ledger.fast_ttl_secs {
            return Err(ConfigError::Invalid(
                "ledger.retention_secs must not be shorter than ledger.fast_ttl_secs".to_string(),
            ));
        }
        for name in self.cache.ttl_overrides.keys() {
            if crate::services::cache::CacheNamespace::from_name(name).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "cache.ttl_overrides: unknown namespace {}",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Create config for testing: in-memory database, channel transport.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig {
                url: "sqlite::memory:".to_string(),
            },
            ..Self::default()
        }
    }
}
