//! Segment write path.
//!
//! Entry point for the content-editing collaborator. Every mutation runs
//! as one unit of work:
//!
//! 1. begin, lock the parent work
//! 2. mutate the segment
//! 3. recompute the work's statistics, then publish `SegmentSetChanged` to
//!    any other listeners on the local bus
//! 4. commit
//! 5. invalidate cached work and segment entries
//!
//! A failure in steps 1-4 rolls everything back, including the segment
//! mutation, and is returned to the caller. Step 5 is best-effort.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::{BusError, LocalEventBus, SegmentListener, SegmentSetChanged};
use crate::interfaces::aggregate_store::{AggregateStore, StorageError, UnitOfWork};
use crate::model::{Segment, SegmentDraft, SegmentId, WorkId};
use crate::services::cache::CacheCoordinator;
use crate::services::recalculator::StatisticsRecalculator;

/// Result type for segment operations.
pub type Result<T> = std::result::Result<T, SegmentError>;

/// Errors returned by the segment write path. The unit of work has been
/// rolled back whenever one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Statistics recompute failed: {0}")]
    Recompute(#[from] BusError),
}

/// Transactional segment mutations with synchronous statistics recompute.
///
/// The recalculator is part of the write path and runs whether or not
/// anything is subscribed to `bus`.
pub struct SegmentService {
    store: Arc<dyn AggregateStore>,
    bus: Arc<LocalEventBus>,
    cache: Arc<CacheCoordinator>,
    recalculator: StatisticsRecalculator,
}

impl SegmentService {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        bus: Arc<LocalEventBus>,
        cache: Arc<CacheCoordinator>,
    ) -> Self {
        Self {
            store,
            bus,
            cache,
            recalculator: StatisticsRecalculator::new(),
        }
    }

    /// Add a segment to a work.
    #[tracing::instrument(name = "segments.create", skip_all, fields(work_id = %work_id))]
    pub async fn create_segment(&self, work_id: WorkId, draft: SegmentDraft) -> Result<Segment> {
        let mut uow = self.open(work_id).await?;
        let segment = uow.insert_segment(work_id, &draft).await?;
        self.complete(uow, work_id, Some(segment.id)).await?;
        Ok(segment)
    }

    /// Replace a segment's editable fields.
    #[tracing::instrument(
        name = "segments.update",
        skip_all,
        fields(work_id = %work_id, segment_id = %segment_id)
    )]
    pub async fn update_segment(
        &self,
        work_id: WorkId,
        segment_id: SegmentId,
        draft: SegmentDraft,
    ) -> Result<Segment> {
        let mut uow = self.open(work_id).await?;
        owned_segment(uow.as_mut(), work_id, segment_id).await?;
        let segment = uow.update_segment(segment_id, &draft).await?;
        self.complete(uow, work_id, Some(segment_id)).await?;
        Ok(segment)
    }

    /// Soft-delete a segment.
    #[tracing::instrument(
        name = "segments.delete",
        skip_all,
        fields(work_id = %work_id, segment_id = %segment_id)
    )]
    pub async fn delete_segment(&self, work_id: WorkId, segment_id: SegmentId) -> Result<Segment> {
        let mut uow = self.open(work_id).await?;
        owned_segment(uow.as_mut(), work_id, segment_id).await?;
        let segment = uow.delete_segment(segment_id).await?;
        self.complete(uow, work_id, Some(segment_id)).await?;
        Ok(segment)
    }

    /// Publish or unpublish a segment.
    #[tracing::instrument(
        name = "segments.publish",
        skip_all,
        fields(work_id = %work_id, segment_id = %segment_id, published)
    )]
    pub async fn set_segment_published(
        &self,
        work_id: WorkId,
        segment_id: SegmentId,
        published: bool,
    ) -> Result<Segment> {
        let mut uow = self.open(work_id).await?;
        owned_segment(uow.as_mut(), work_id, segment_id).await?;
        let segment = uow.set_segment_published(segment_id, published).await?;
        self.complete(uow, work_id, Some(segment_id)).await?;
        Ok(segment)
    }

    /// Recompute a work's statistics after segment changes made elsewhere.
    #[tracing::instrument(name = "segments.notify", skip_all, fields(work_id = %work_id))]
    pub async fn notify_segment_set_changed(&self, work_id: WorkId) -> Result<()> {
        let uow = self.open(work_id).await?;
        self.complete(uow, work_id, None).await
    }

    async fn open(&self, work_id: WorkId) -> Result<Box<dyn UnitOfWork>> {
        let mut uow = self.store.begin().await?;
        uow.lock_work(work_id).await?;
        Ok(uow)
    }

    async fn complete(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        work_id: WorkId,
        segment_id: Option<SegmentId>,
    ) -> Result<()> {
        let event = SegmentSetChanged { work_id };
        let recomputed = match self
            .recalculator
            .on_segment_set_changed(uow.as_mut(), &event)
            .await
        {
            Ok(()) => self.bus.publish(uow.as_mut(), event).await,
            Err(source) => Err(BusError::ListenerFailed {
                name: self.recalculator.name().to_string(),
                source,
            }),
        };
        if let Err(e) = recomputed {
            warn!(work_id = %work_id, error = %e, "Recompute failed, rolling back");
            if let Err(rollback) = uow.rollback().await {
                warn!(work_id = %work_id, error = %rollback, "Rollback failed");
            }
            return Err(e.into());
        }

        uow.commit().await?;
        debug!(work_id = %work_id, "Segment change committed");

        self.cache.invalidate_work(work_id).await;
        if let Some(segment_id) = segment_id {
            self.cache.invalidate_segment(segment_id).await;
        }
        Ok(())
    }
}

/// Read a live segment and check it belongs to `work_id`.
async fn owned_segment(
    uow: &mut dyn UnitOfWork,
    work_id: WorkId,
    segment_id: SegmentId,
) -> Result<Segment> {
    let segment = uow
        .read_segment(segment_id)
        .await?
        .ok_or(StorageError::SegmentNotFound(segment_id))?;
    if segment.work_id != work_id {
        return Err(StorageError::SegmentWorkMismatch {
            segment: segment_id,
            work: work_id,
        }
        .into());
    }
    Ok(segment)
}
