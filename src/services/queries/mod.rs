//! Read facade over the aggregate store with read-through caching.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::interfaces::aggregate_store::{AggregateStore, Result};
use crate::model::{Segment, SegmentId, SegmentPage, Work, WorkId};
use crate::services::cache::{CacheCoordinator, CacheNamespace};

/// Segments per cached list page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Derived counters of a work, cached separately from the full snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkStatistics {
    pub segment_count: i32,
    pub total_word_count: i64,
    pub avg_rating: f64,
    pub review_count: i32,
    pub vote_count: i32,
}

impl From<&Work> for WorkStatistics {
    fn from(work: &Work) -> Self {
        Self {
            segment_count: work.segment_count,
            total_word_count: work.total_word_count,
            avg_rating: work.avg_rating,
            review_count: work.review_count,
            vote_count: work.vote_count,
        }
    }
}

/// Cached reads of works and segments.
pub struct WorkQueries {
    store: Arc<dyn AggregateStore>,
    cache: Arc<CacheCoordinator>,
    page_size: u32,
}

impl WorkQueries {
    pub fn new(store: Arc<dyn AggregateStore>, cache: Arc<CacheCoordinator>) -> Self {
        Self {
            store,
            cache,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[tracing::instrument(name = "queries.work", skip_all, fields(work_id = %id))]
    pub async fn work(&self, id: WorkId) -> Result<Option<Work>> {
        let key = self.cache.keys().work(id);
        self.cache
            .get_or_load(CacheNamespace::Work, &key, || self.store.read_work(id))
            .await
    }

    /// Counters only. Served from their own cache entry.
    #[tracing::instrument(name = "queries.statistics", skip_all, fields(work_id = %id))]
    pub async fn statistics(&self, id: WorkId) -> Result<Option<WorkStatistics>> {
        let key = self.cache.keys().work_statistics(id);
        self.cache
            .get_or_load(CacheNamespace::Work, &key, || async {
                Ok(self.store.read_work(id).await?.as_ref().map(WorkStatistics::from))
            })
            .await
    }

    /// A live segment. Soft-deleted segments read as absent.
    #[tracing::instrument(name = "queries.segment", skip_all, fields(segment_id = %id))]
    pub async fn segment(&self, id: SegmentId) -> Result<Option<Segment>> {
        let key = self.cache.keys().segment(id);
        self.cache
            .get_or_load(CacheNamespace::Segment, &key, || async {
                Ok(self
                    .store
                    .read_segment(id)
                    .await?
                    .filter(|s| s.deleted_at.is_none()))
            })
            .await
    }

    /// One zero-based page of a work's live segments in ordinal order.
    #[tracing::instrument(
        name = "queries.segment_page",
        skip_all,
        fields(work_id = %work_id, page)
    )]
    pub async fn segment_page(&self, work_id: WorkId, page: u32) -> Result<SegmentPage> {
        let key = self.cache.keys().segment_page(work_id, page);
        let cached = self
            .cache
            .get_or_load(CacheNamespace::SegmentList, &key, || async {
                self.store
                    .list_segments(work_id, page, self.page_size)
                    .await
                    .map(Some)
            })
            .await?;

        Ok(cached.unwrap_or_else(|| SegmentPage {
            work_id,
            page,
            page_size: self.page_size,
            segments: Vec::new(),
        }))
    }

    /// Count a view. `None` when the cache cannot count.
    pub async fn record_view(&self, work_id: WorkId) -> Option<u64> {
        self.cache.record_view(work_id).await
    }
}
