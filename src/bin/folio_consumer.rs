//! folio-consumer: external statistics event consumer
//!
//! Applies `rating-update` and `vote-count-update` events to work counters
//! with exactly-once effect, invalidating cached work views as it goes.
//!
//! ## Architecture
//! ```text
//! [rating/vote services] --(Kafka)--> [folio-consumer] --> [SQLite]
//!                                            |
//!                                            +--> [idempotency ledger]
//!                                            +--> [cache]
//! ```
//!
//! ## Configuration
//! - FOLIO_CONFIG: path to a YAML config file (optional)
//! - FOLIO__*: overrides, e.g. FOLIO__MESSAGING__TYPE=kafka
//! - FOLIO_LOG: log filter (default: info)

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use folio::bus::{ChannelTransport, DeliveryHandler, Transport};
#[cfg(feature = "kafka")]
use folio::bus::KafkaTransport;
use folio::config::{Config, MessagingType};
use folio::services::{CacheCoordinator, ExternalEventConsumer, TieredLedger};
use folio::storage::{init_cache, init_fast_ledger_tier, init_storage};
use folio::utils::bootstrap::{init_tracing, shutdown_signal};

fn build_transport(config: &Config) -> Result<Box<dyn Transport>, Box<dyn std::error::Error>> {
    match config.messaging.messaging_type {
        MessagingType::Channel => Ok(Box::new(ChannelTransport::new(&config.messaging.channel))),
        #[cfg(feature = "kafka")]
        MessagingType::Kafka => Ok(Box::new(KafkaTransport::new(
            config.messaging.kafka.clone(),
        )?)),
        #[cfg(not(feature = "kafka"))]
        MessagingType::Kafka => {
            error!("Kafka messaging requested but 'kafka' feature is not enabled");
            Err("Kafka feature not enabled".into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;

    let (store, durable) = init_storage(&config.storage).await?;
    let fast = init_fast_ledger_tier(&config.ledger).await?;
    let ledger = Arc::new(
        TieredLedger::new(fast, durable)
            .with_fast_ttl(config.ledger.fast_ttl())
            .with_retention(config.ledger.retention()),
    );
    let cache = Arc::new(CacheCoordinator::from_config(
        init_cache(&config.cache).await?,
        &config.cache,
    ));

    let consumer = Arc::new(
        ExternalEventConsumer::new(store, ledger.clone(), cache)
            .with_retry_policy(config.consumer.retry_policy()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let purge = Arc::clone(&ledger)
        .spawn_purge_task(config.ledger.purge_interval(), shutdown_rx.clone());

    let transport = build_transport(&config)?;
    info!(transport = transport.name(), "folio-consumer started");

    let handler: Arc<dyn DeliveryHandler> = consumer.clone();
    let run = transport.run(handler, shutdown_rx);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            if let Err(e) = result {
                error!(error = %e, "Transport stopped");
                let _ = shutdown_tx.send(true);
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            run.await?;
        }
    }

    let _ = shutdown_tx.send(true);
    purge.await?;

    info!(stats = ?consumer.stats(), "folio-consumer stopped");
    Ok(())
}
