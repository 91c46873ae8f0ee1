//! Mock AggregateStore implementation for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::interfaces::aggregate_store::{AggregateStore, Result, StorageError, UnitOfWork};
use crate::model::{
    ExternalUpdate, Segment, SegmentAggregates, SegmentDraft, SegmentId, SegmentPage, Work,
    WorkId, WorkStatus,
};

#[derive(Default)]
struct State {
    works: HashMap<WorkId, Work>,
    segments: BTreeMap<SegmentId, Segment>,
}

type WorkLocks = Mutex<HashMap<WorkId, Arc<Mutex<()>>>>;

/// In-memory aggregate store with per-work row locks and failure injection.
pub struct MockAggregateStore {
    state: Arc<RwLock<State>>,
    locks: Arc<WorkLocks>,
    next_work_id: AtomicI64,
    next_segment_id: Arc<AtomicI64>,
    unavailable: AtomicBool,
    fail_applies: AtomicU32,
    fail_on_counters: Arc<AtomicBool>,
    apply_delay_ms: AtomicU64,
    applied: AtomicU32,
    work_reads: AtomicU32,
}

impl Default for MockAggregateStore {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            locks: Arc::new(Mutex::new(HashMap::new())),
            next_work_id: AtomicI64::new(1),
            next_segment_id: Arc::new(AtomicI64::new(1)),
            unavailable: AtomicBool::new(false),
            fail_applies: AtomicU32::new(0),
            fail_on_counters: Arc::new(AtomicBool::new(false)),
            apply_delay_ms: AtomicU64::new(0),
            applied: AtomicU32::new(0),
            work_reads: AtomicU32::new(0),
        }
    }
}

impl MockAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with `Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` calls to `apply_external_update` with `Unavailable`.
    pub fn fail_next_applies(&self, n: u32) {
        self.fail_applies.store(n, Ordering::SeqCst);
    }

    /// Fail `write_work_counters` inside units of work while set.
    pub fn set_fail_on_counters(&self, fail: bool) {
        self.fail_on_counters.store(fail, Ordering::SeqCst);
    }

    /// Sleep inside `apply_external_update` to widen race windows.
    pub fn set_apply_delay(&self, delay: Duration) {
        self.apply_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of successful `apply_external_update` calls.
    pub fn applied_count(&self) -> u32 {
        self.applied.load(Ordering::SeqCst)
    }

    /// Number of `read_work` calls that reached the store.
    pub fn work_read_count(&self) -> u32 {
        self.work_reads.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("mock store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AggregateStore for MockAggregateStore {
    async fn read_work(&self, id: WorkId) -> Result<Option<Work>> {
        self.check_available()?;
        self.work_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.read().await.works.get(&id).cloned())
    }

    async fn read_segment(&self, id: SegmentId) -> Result<Option<Segment>> {
        self.check_available()?;
        Ok(self.state.read().await.segments.get(&id).cloned())
    }

    async fn list_segments(
        &self,
        work_id: WorkId,
        page: u32,
        page_size: u32,
    ) -> Result<SegmentPage> {
        self.check_available()?;
        let state = self.state.read().await;

        let mut segments: Vec<Segment> = state
            .segments
            .values()
            .filter(|s| s.work_id == work_id && s.deleted_at.is_none())
            .cloned()
            .collect();
        segments.sort_by_key(|s| (s.ordinal, s.id));

        let start = (page as usize).saturating_mul(page_size as usize);
        let segments = segments
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();

        Ok(SegmentPage {
            work_id,
            page,
            page_size,
            segments,
        })
    }

    async fn read_segment_aggregates(&self, work_id: WorkId) -> Result<SegmentAggregates> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(SegmentAggregates::from_segments(
            state.segments.values().filter(|s| s.work_id == work_id),
        ))
    }

    async fn write_work_counters(&self, id: WorkId, counters: SegmentAggregates) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let work = state
            .works
            .get_mut(&id)
            .ok_or(StorageError::WorkNotFound(id))?;
        work.segment_count = counters.count;
        work.total_word_count = counters.total_words;
        work.updated_at = Utc::now();
        Ok(())
    }

    async fn apply_external_update(&self, id: WorkId, update: &ExternalUpdate) -> Result<()> {
        self.check_available()?;

        let remaining = self.fail_applies.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_applies.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Unavailable(
                "mock apply failure".to_string(),
            ));
        }

        let delay = self.apply_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut state = self.state.write().await;
        let work = state
            .works
            .get_mut(&id)
            .ok_or(StorageError::WorkNotFound(id))?;
        update.apply_to(work);
        work.updated_at = Utc::now();
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_work(&self, title: &str) -> Result<Work> {
        self.check_available()?;
        let now = Utc::now();
        let id = WorkId(self.next_work_id.fetch_add(1, Ordering::SeqCst));

        let work = Work {
            id,
            public_id: Uuid::new_v4(),
            title: title.to_string(),
            status: WorkStatus::Draft,
            segment_count: 0,
            total_word_count: 0,
            avg_rating: 0.0,
            review_count: 0,
            vote_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.state.write().await.works.insert(id, work.clone());
        Ok(work)
    }

    async fn update_work_status(&self, id: WorkId, status: WorkStatus) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let work = state
            .works
            .get_mut(&id)
            .ok_or(StorageError::WorkNotFound(id))?;
        work.status = status;
        work.updated_at = Utc::now();
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        self.check_available()?;
        Ok(Box::new(MockUnitOfWork {
            state: Arc::clone(&self.state),
            locks: Arc::clone(&self.locks),
            next_segment_id: Arc::clone(&self.next_segment_id),
            fail_on_counters: Arc::clone(&self.fail_on_counters),
            guards: HashMap::new(),
            staged_segments: BTreeMap::new(),
            staged_counters: HashMap::new(),
        }))
    }
}

/// Unit of work staging writes until commit.
///
/// Holds an owned per-work mutex guard for every locked work, so units of
/// work on the same work serialize while different works proceed.
pub struct MockUnitOfWork {
    state: Arc<RwLock<State>>,
    locks: Arc<WorkLocks>,
    next_segment_id: Arc<AtomicI64>,
    fail_on_counters: Arc<AtomicBool>,
    guards: HashMap<WorkId, OwnedMutexGuard<()>>,
    staged_segments: BTreeMap<SegmentId, Segment>,
    staged_counters: HashMap<WorkId, SegmentAggregates>,
}

impl MockUnitOfWork {
    fn require_locked(&self, id: WorkId) -> Result<()> {
        if self.guards.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::WorkNotLocked(id))
        }
    }

    async fn current_segment(&self, id: SegmentId) -> Option<Segment> {
        match self.staged_segments.get(&id) {
            Some(staged) => Some(staged.clone()),
            None => self.state.read().await.segments.get(&id).cloned(),
        }
    }

    async fn locked_live_segment(&self, id: SegmentId) -> Result<Segment> {
        let segment = self
            .current_segment(id)
            .await
            .filter(|s| s.deleted_at.is_none())
            .ok_or(StorageError::SegmentNotFound(id))?;
        self.require_locked(segment.work_id)?;
        Ok(segment)
    }

    fn stage(&mut self, segment: Segment) -> Segment {
        self.staged_segments.insert(segment.id, segment.clone());
        segment
    }
}

#[async_trait]
impl UnitOfWork for MockUnitOfWork {
    async fn lock_work(&mut self, id: WorkId) -> Result<Work> {
        if !self.guards.contains_key(&id) {
            let lock = {
                let mut locks = self.locks.lock().await;
                Arc::clone(locks.entry(id).or_default())
            };
            let guard = lock.lock_owned().await;
            self.guards.insert(id, guard);
        }

        let state = self.state.read().await;
        match state.works.get(&id) {
            Some(work) => Ok(work.clone()),
            None => {
                drop(state);
                self.guards.remove(&id);
                Err(StorageError::WorkNotFound(id))
            }
        }
    }

    async fn insert_segment(&mut self, work_id: WorkId, draft: &SegmentDraft) -> Result<Segment> {
        self.require_locked(work_id)?;
        let now = Utc::now();
        let id = SegmentId(self.next_segment_id.fetch_add(1, Ordering::SeqCst));

        Ok(self.stage(Segment {
            id,
            work_id,
            ordinal: draft.ordinal,
            title: draft.title.clone(),
            word_count: draft.word_count,
            valid: draft.valid,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }))
    }

    async fn update_segment(&mut self, id: SegmentId, draft: &SegmentDraft) -> Result<Segment> {
        let mut segment = self.locked_live_segment(id).await?;
        segment.ordinal = draft.ordinal;
        segment.title = draft.title.clone();
        segment.word_count = draft.word_count;
        segment.valid = draft.valid;
        segment.updated_at = Utc::now();
        Ok(self.stage(segment))
    }

    async fn delete_segment(&mut self, id: SegmentId) -> Result<Segment> {
        let segment = self
            .current_segment(id)
            .await
            .ok_or(StorageError::SegmentNotFound(id))?;
        self.require_locked(segment.work_id)?;
        if segment.deleted_at.is_some() {
            return Ok(segment);
        }

        let now = Utc::now();
        let mut segment = segment;
        segment.valid = false;
        segment.deleted_at = Some(now);
        segment.updated_at = now;
        Ok(self.stage(segment))
    }

    async fn set_segment_published(&mut self, id: SegmentId, published: bool) -> Result<Segment> {
        let mut segment = self.locked_live_segment(id).await?;
        segment.valid = published;
        segment.updated_at = Utc::now();
        Ok(self.stage(segment))
    }

    async fn read_segment(&mut self, id: SegmentId) -> Result<Option<Segment>> {
        Ok(self.current_segment(id).await)
    }

    async fn read_segment_aggregates(&mut self, work_id: WorkId) -> Result<SegmentAggregates> {
        let state = self.state.read().await;
        let committed = state
            .segments
            .values()
            .filter(|s| s.work_id == work_id && !self.staged_segments.contains_key(&s.id));
        let staged = self
            .staged_segments
            .values()
            .filter(|s| s.work_id == work_id);
        Ok(SegmentAggregates::from_segments(committed.chain(staged)))
    }

    async fn write_work_counters(
        &mut self,
        id: WorkId,
        counters: SegmentAggregates,
    ) -> Result<()> {
        self.require_locked(id)?;
        if self.fail_on_counters.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "mock counter write failure".to_string(),
            ));
        }
        self.staged_counters.insert(id, counters);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut state = this.state.write().await;
        let now = Utc::now();

        for (id, segment) in this.staged_segments {
            state.segments.insert(id, segment);
        }
        for (id, counters) in this.staged_counters {
            if let Some(work) = state.works.get_mut(&id) {
                work.segment_count = counters.count;
                work.total_word_count = counters.total_words;
                work.updated_at = now;
            }
        }
        // Row locks release when `this.guards` drops
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
