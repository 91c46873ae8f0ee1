//! Synchronous in-process bus for segment-set changes.
//!
//! Listeners run on the publisher's task, in registration order, against
//! the publisher's open unit of work. Nothing is queued: when `publish`
//! returns, every listener has finished, and a failure from any of them is
//! the publisher's failure.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{BusError, Result};
use crate::interfaces::aggregate_store::{self, UnitOfWork};
use crate::model::WorkId;

/// The set of segments counted for a work may have changed.
///
/// Carries only the identity to recompute; listeners re-read current rows
/// instead of trusting event contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSetChanged {
    pub work_id: WorkId,
}

/// Subscriber to segment-set changes.
#[async_trait]
pub trait SegmentListener: Send + Sync {
    /// Name for logs and error reports.
    fn name(&self) -> &str;

    /// React to a change, reading and writing only through `uow`.
    async fn on_segment_set_changed(
        &self,
        uow: &mut dyn UnitOfWork,
        event: &SegmentSetChanged,
    ) -> aggregate_store::Result<()>;
}

/// Registry of segment listeners.
#[derive(Default)]
pub struct LocalEventBus {
    listeners: RwLock<Vec<Arc<dyn SegmentListener>>>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Listeners run in registration order.
    pub async fn subscribe(&self, listener: Arc<dyn SegmentListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Number of registered listeners.
    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Run every listener against `uow`. Stops at the first failure.
    pub async fn publish(&self, uow: &mut dyn UnitOfWork, event: SegmentSetChanged) -> Result<()> {
        let listeners = self.listeners.read().await;

        for listener in listeners.iter() {
            debug!(
                listener = listener.name(),
                work_id = %event.work_id,
                "Dispatching segment-set change"
            );
            listener
                .on_segment_set_changed(uow, &event)
                .await
                .map_err(|source| BusError::ListenerFailed {
                    name: listener.name().to_string(),
                    source,
                })?;
        }

        Ok(())
    }
}
