//! Shared utilities for integration tests.
//!
//! Builds a file-backed SQLite store in a temp directory so tests exercise
//! real transactions across more than one pooled connection.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use folio::bus::LocalEventBus;
use folio::interfaces::{AggregateStore, LedgerTier};
use folio::model::{SegmentDraft, WorkId};
use folio::services::{CacheCoordinator, SegmentService};
use folio::storage::{sqlite, MemoryCacheStore, SqliteAggregateStore, SqliteLedgerTier};

/// A temp-dir SQLite database. The directory is removed on drop.
pub struct TestDb {
    _dir: TempDir,
    pub store: Arc<SqliteAggregateStore>,
    pub ledger: Arc<SqliteLedgerTier>,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("folio.db").display());

    let pool = sqlite::connect(&url)
        .await
        .expect("Failed to open SQLite database");

    let store = SqliteAggregateStore::new(pool.clone());
    store.init().await.expect("Failed to create aggregate tables");
    let ledger = SqliteLedgerTier::new(pool);
    ledger.init().await.expect("Failed to create ledger table");

    TestDb {
        _dir: dir,
        store: Arc::new(store),
        ledger: Arc::new(ledger),
    }
}

impl TestDb {
    pub fn aggregate_store(&self) -> Arc<dyn AggregateStore> {
        self.store.clone()
    }

    pub fn ledger_tier(&self) -> Arc<dyn LedgerTier> {
        self.ledger.clone()
    }
}

/// In-memory cache with the default prefix.
pub fn memory_cache() -> (Arc<MemoryCacheStore>, Arc<CacheCoordinator>) {
    let store = Arc::new(MemoryCacheStore::new());
    let cache = Arc::new(CacheCoordinator::new(store.clone(), "folio"));
    (store, cache)
}

/// Segment service with an empty local bus for extra listeners.
pub async fn segment_service(
    store: Arc<dyn AggregateStore>,
    cache: Arc<CacheCoordinator>,
) -> (Arc<LocalEventBus>, SegmentService) {
    let bus = Arc::new(LocalEventBus::new());
    let service = SegmentService::new(store, bus.clone(), cache);
    (bus, service)
}

pub fn draft(ordinal: i32, word_count: i32) -> SegmentDraft {
    SegmentDraft {
        ordinal,
        title: format!("Chapter {}", ordinal + 1),
        word_count,
        valid: true,
    }
}

pub async fn counters(store: &dyn AggregateStore, work_id: WorkId) -> (i32, i64) {
    let work = store
        .read_work(work_id)
        .await
        .expect("read_work should succeed")
        .expect("work should exist");
    (work.segment_count, work.total_word_count)
}
