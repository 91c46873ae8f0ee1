//! Administrative write path for works.

use std::sync::Arc;

use tracing::info;

use crate::interfaces::aggregate_store::{AggregateStore, Result};
use crate::model::{Work, WorkId, WorkStatus};
use crate::services::cache::CacheCoordinator;

/// Direct edits to works outside the segment and event paths.
pub struct WorkAdmin {
    store: Arc<dyn AggregateStore>,
    cache: Arc<CacheCoordinator>,
}

impl WorkAdmin {
    pub fn new(store: Arc<dyn AggregateStore>, cache: Arc<CacheCoordinator>) -> Self {
        Self { store, cache }
    }

    #[tracing::instrument(name = "admin.create_work", skip_all)]
    pub async fn create_work(&self, title: &str) -> Result<Work> {
        let work = self.store.create_work(title).await?;
        info!(work_id = %work.id, public_id = %work.public_id, "Created work");
        Ok(work)
    }

    #[tracing::instrument(
        name = "admin.update_status",
        skip_all,
        fields(work_id = %id, status = %status)
    )]
    pub async fn update_status(&self, id: WorkId, status: WorkStatus) -> Result<()> {
        self.store.update_work_status(id, status).await?;
        self.cache.invalidate_work(id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::aggregate_store::StorageError;
    use crate::services::cache::CacheNamespace;
    use crate::storage::memory::MemoryCacheStore;
    use crate::storage::mock::MockAggregateStore;

    fn admin() -> (
        Arc<MockAggregateStore>,
        Arc<MemoryCacheStore>,
        Arc<CacheCoordinator>,
        WorkAdmin,
    ) {
        let store = Arc::new(MockAggregateStore::new());
        let cache_store = Arc::new(MemoryCacheStore::new());
        let cache = Arc::new(CacheCoordinator::new(cache_store.clone(), "folio"));
        let admin = WorkAdmin::new(store.clone(), cache.clone());
        (store, cache_store, cache, admin)
    }

    #[tokio::test]
    async fn test_create_work_starts_zeroed() {
        let (_, _, _, admin) = admin();
        let work = admin.create_work("Salt Roads").await.unwrap();
        assert_eq!(work.status, WorkStatus::Draft);
        assert_eq!(work.segment_count, 0);
        assert_eq!(work.total_word_count, 0);
        assert_eq!(work.vote_count, 0);
    }

    #[tokio::test]
    async fn test_update_status_invalidates() {
        let (store, cache_store, cache, admin) = admin();
        let work = admin.create_work("Salt Roads").await.unwrap();
        cache
            .put(CacheNamespace::Work, &cache.keys().work(work.id), &work)
            .await;

        admin
            .update_status(work.id, WorkStatus::Ongoing)
            .await
            .unwrap();

        assert!(cache_store.is_empty().await);
        let stored = store.read_work(work.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkStatus::Ongoing);
    }

    #[tokio::test]
    async fn test_update_status_missing_work() {
        let (_, _, _, admin) = admin();
        let err = admin
            .update_status(WorkId(5), WorkStatus::Hidden)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::WorkNotFound(WorkId(5))));
    }
}
