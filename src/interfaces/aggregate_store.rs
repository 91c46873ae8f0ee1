//! Aggregate store interface.

use async_trait::async_trait;

use crate::model::{
    ExternalUpdate, Segment, SegmentAggregates, SegmentDraft, SegmentId, SegmentPage, Work,
    WorkId, WorkStatus,
};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Work not found: {0}")]
    WorkNotFound(WorkId),

    #[error("Segment not found: {0}")]
    SegmentNotFound(SegmentId),

    #[error("Segment {segment} does not belong to work {work}")]
    SegmentWorkMismatch { segment: SegmentId, work: WorkId },

    #[error("Work {0} is not locked by this unit of work")]
    WorkNotLocked(WorkId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// Whether retrying the same call could succeed.
    ///
    /// Missing rows and corrupt data are permanent; connectivity and
    /// database-level failures are treated as transient.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            #[cfg(feature = "sqlite")]
            StorageError::Database(e) => !matches!(e, sqlx::Error::RowNotFound),
            _ => false,
        }
    }
}

/// Durable store for works and segments.
///
/// Point reads and single-row writes run outside any unit of work. Segment
/// mutations go through [`UnitOfWork`] so the statistics recompute commits
/// or rolls back together with the mutation that triggered it.
///
/// Implementations:
/// - `SqliteAggregateStore`: SQLite via sqlx
/// - `MockAggregateStore`: in-memory, for tests
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Read a work by surrogate id.
    async fn read_work(&self, id: WorkId) -> Result<Option<Work>>;

    /// Read a segment by id, including soft-deleted ones.
    async fn read_segment(&self, id: SegmentId) -> Result<Option<Segment>>;

    /// List non-deleted segments of a work ordered by ordinal.
    ///
    /// `page` is zero-based.
    async fn list_segments(&self, work_id: WorkId, page: u32, page_size: u32)
        -> Result<SegmentPage>;

    /// Count and word sum over the valid segments of a work.
    async fn read_segment_aggregates(&self, work_id: WorkId) -> Result<SegmentAggregates>;

    /// Overwrite the segment-derived counters of a work.
    async fn write_work_counters(&self, id: WorkId, counters: SegmentAggregates) -> Result<()>;

    /// Overwrite the externally owned rating/vote fields of a work.
    ///
    /// Returns `WorkNotFound` if the work does not exist.
    async fn apply_external_update(&self, id: WorkId, update: &ExternalUpdate) -> Result<()>;

    /// Create a work with zeroed counters.
    async fn create_work(&self, title: &str) -> Result<Work>;

    /// Change a work's lifecycle status.
    async fn update_work_status(&self, id: WorkId, status: WorkStatus) -> Result<()>;

    /// Open a unit of work (transaction).
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// A single atomic unit of work against the aggregate store.
///
/// Writes are invisible to other readers until [`UnitOfWork::commit`].
/// Dropping an uncommitted unit of work discards its writes.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Take the row lock on a work and return its current state.
    ///
    /// Concurrent units of work locking the same work are serialized here.
    /// Segment writes require the parent work to be locked first.
    async fn lock_work(&mut self, id: WorkId) -> Result<Work>;

    /// Insert a segment under a locked work.
    async fn insert_segment(&mut self, work_id: WorkId, draft: &SegmentDraft) -> Result<Segment>;

    /// Replace a segment's editable fields.
    async fn update_segment(&mut self, id: SegmentId, draft: &SegmentDraft) -> Result<Segment>;

    /// Soft-delete a segment: it stops counting but the row remains.
    async fn delete_segment(&mut self, id: SegmentId) -> Result<Segment>;

    /// Toggle a segment's published flag.
    async fn set_segment_published(&mut self, id: SegmentId, published: bool) -> Result<Segment>;

    /// Read a segment as seen by this unit of work.
    async fn read_segment(&mut self, id: SegmentId) -> Result<Option<Segment>>;

    /// Count and word sum as seen by this unit of work.
    async fn read_segment_aggregates(&mut self, work_id: WorkId) -> Result<SegmentAggregates>;

    /// Overwrite the segment-derived counters of a locked work.
    async fn write_work_counters(&mut self, id: WorkId, counters: SegmentAggregates)
        -> Result<()>;

    /// Make all writes durable and release locks.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all writes and release locks.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
