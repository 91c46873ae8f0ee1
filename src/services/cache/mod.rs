//! Cache coordination.
//!
//! The cache is a read-through accelerator in front of the aggregate store
//! and never authoritative. Every mutating path calls [`CacheCoordinator::invalidate`]
//! after its write commits. Cache failures never surface to callers: reads
//! degrade to a miss, writes and invalidations are skipped with a warning,
//! and anything left behind expires at its namespace TTL.
//!
//! Key layout: `{prefix}:{namespace}:{id}[:{shape}]`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::interfaces::CacheStore;
use crate::model::{SegmentId, WorkId};

/// Cache key namespace. Each has its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    /// Work snapshot and its derived shapes (statistics).
    Work,
    /// Segment detail by id.
    Segment,
    /// Segment list page of a work.
    SegmentList,
    /// View-count counter.
    Views,
    /// Popular/ranking lists.
    Ranking,
    /// Search result snapshots.
    Search,
    /// Category snapshots.
    Category,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 7] = [
        CacheNamespace::Work,
        CacheNamespace::Segment,
        CacheNamespace::SegmentList,
        CacheNamespace::Views,
        CacheNamespace::Ranking,
        CacheNamespace::Search,
        CacheNamespace::Category,
    ];

    /// Key segment and config name.
    pub fn name(&self) -> &'static str {
        match self {
            CacheNamespace::Work => "work",
            CacheNamespace::Segment => "segment",
            CacheNamespace::SegmentList => "seglist",
            CacheNamespace::Views => "views",
            CacheNamespace::Ranking => "ranking",
            CacheNamespace::Search => "search",
            CacheNamespace::Category => "category",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.name() == name)
    }

    /// Upper bound on staleness for entries in this namespace.
    pub fn default_ttl(&self) -> Duration {
        const MINUTE: u64 = 60;
        Duration::from_secs(match self {
            CacheNamespace::Work => 60 * MINUTE,
            CacheNamespace::Segment => 120 * MINUTE,
            CacheNamespace::SegmentList => 120 * MINUTE,
            CacheNamespace::Views => 30 * MINUTE,
            CacheNamespace::Ranking => 15 * MINUTE,
            CacheNamespace::Search => 10 * MINUTE,
            CacheNamespace::Category => 30 * MINUTE,
        })
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Entity whose cached derivatives can be invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Work,
    Segment,
}

/// Builds cache keys and invalidation patterns.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn key(&self, ns: CacheNamespace, id: impl fmt::Display) -> String {
        format!("{}:{}:{}", self.prefix, ns, id)
    }

    fn shaped(
        &self,
        ns: CacheNamespace,
        id: impl fmt::Display,
        shape: impl fmt::Display,
    ) -> String {
        format!("{}:{}:{}:{}", self.prefix, ns, id, shape)
    }

    pub fn work(&self, id: WorkId) -> String {
        self.key(CacheNamespace::Work, id)
    }

    /// Precomputed statistics snapshot of a work.
    pub fn work_statistics(&self, id: WorkId) -> String {
        self.shaped(CacheNamespace::Work, id, "stats")
    }

    /// Every shaped key derived from a work snapshot.
    pub fn work_shapes_pattern(&self, id: WorkId) -> String {
        self.shaped(CacheNamespace::Work, id, "*")
    }

    pub fn segment(&self, id: SegmentId) -> String {
        self.key(CacheNamespace::Segment, id)
    }

    pub fn segment_page(&self, work_id: WorkId, page: u32) -> String {
        self.shaped(CacheNamespace::SegmentList, work_id, page)
    }

    pub fn segment_pages_pattern(&self, work_id: WorkId) -> String {
        self.shaped(CacheNamespace::SegmentList, work_id, "*")
    }

    pub fn views(&self, work_id: WorkId) -> String {
        self.key(CacheNamespace::Views, work_id)
    }

    pub fn ranking(&self, list: &str) -> String {
        self.key(CacheNamespace::Ranking, list)
    }

    pub fn category(&self, category: &str) -> String {
        self.key(CacheNamespace::Category, category)
    }

    /// Search snapshot keyed by a SHA-256 digest of the query text, so
    /// arbitrary query strings make well-formed keys.
    pub fn search(&self, query: &str) -> String {
        let digest = hex::encode(Sha256::digest(query.as_bytes()));
        self.key(CacheNamespace::Search, digest)
    }

    /// Every key in a namespace.
    pub fn namespace_pattern(&self, ns: CacheNamespace) -> String {
        self.key(ns, "*")
    }
}

/// Read-through cache with namespace-aware invalidation.
pub struct CacheCoordinator {
    store: Arc<dyn CacheStore>,
    keys: CacheKeys,
    ttls: HashMap<CacheNamespace, Duration>,
}

impl CacheCoordinator {
    /// Coordinator with default namespace TTLs.
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        let ttls = CacheNamespace::ALL
            .into_iter()
            .map(|ns| (ns, ns.default_ttl()))
            .collect();
        Self {
            store,
            keys: CacheKeys::new(prefix),
            ttls,
        }
    }

    /// Coordinator using the configured prefix and TTL overrides.
    ///
    /// Unknown namespace names are ignored here; `Config::validate` rejects
    /// them at load time.
    pub fn from_config(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        let mut coordinator = Self::new(store, config.key_prefix.clone());
        for (name, secs) in &config.ttl_overrides {
            if let Some(ns) = CacheNamespace::from_name(name) {
                coordinator.ttls.insert(ns, Duration::from_secs(*secs));
            }
        }
        coordinator
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn ttl(&self, ns: CacheNamespace) -> Duration {
        self.ttls.get(&ns).copied().unwrap_or_else(|| ns.default_ttl())
    }

    /// Return the cached value for `key`, or load, cache and return it.
    ///
    /// `None` from the loader is returned as-is and not cached. Cache errors
    /// and undecodable entries count as misses.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        ns: CacheNamespace,
        key: &str,
        load: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        match self.store.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    debug!(key = %key, "Cache hit");
                    return Ok(Some(value));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                    if let Err(e) = self.store.delete(key).await {
                        warn!(key = %key, error = %e, "Cache delete failed");
                    }
                }
            },
            Ok(None) => debug!(key = %key, "Cache miss"),
            Err(e) => warn!(key = %key, error = %e, "Cache read failed, loading from store"),
        }

        let value = load().await?;
        if let Some(ref value) = value {
            self.put(ns, key, value).await;
        }
        Ok(value)
    }

    /// Store a value under `key` with the namespace TTL. Best-effort.
    pub async fn put<T: Serialize>(&self, ns: CacheNamespace, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache value encoding failed");
                return;
            }
        };
        if let Err(e) = self.store.set(key, bytes, self.ttl(ns)).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    /// Remove every cache entry derived from an entity. Best-effort.
    ///
    /// - `Work`: snapshot and shaped keys, segment list pages, ranking lists
    ///   and category snapshots (a work's counters feed both)
    /// - `Segment`: segment detail
    pub async fn invalidate(&self, kind: EntityKind, id: i64) {
        match kind {
            EntityKind::Work => {
                let work_id = WorkId(id);
                self.delete_key(&self.keys.work(work_id)).await;
                for pattern in [
                    self.keys.work_shapes_pattern(work_id),
                    self.keys.segment_pages_pattern(work_id),
                    self.keys.namespace_pattern(CacheNamespace::Ranking),
                    self.keys.namespace_pattern(CacheNamespace::Category),
                ] {
                    self.delete_pattern(&pattern).await;
                }
            }
            EntityKind::Segment => self.delete_key(&self.keys.segment(SegmentId(id))).await,
        }

        debug!(entity = ?kind, id, "Invalidated cache");
    }

    pub async fn invalidate_work(&self, id: WorkId) {
        self.invalidate(EntityKind::Work, id.0).await
    }

    pub async fn invalidate_segment(&self, id: SegmentId) {
        self.invalidate(EntityKind::Segment, id.0).await
    }

    /// Count a view of a work. `None` if the cache is unavailable.
    pub async fn record_view(&self, work_id: WorkId) -> Option<u64> {
        let key = self.keys.views(work_id);
        match self.store.incr(&key, self.ttl(CacheNamespace::Views)).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(key = %key, error = %e, "View count increment failed");
                None
            }
        }
    }

    async fn delete_key(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key = %key, error = %e, "Cache invalidation failed");
        }
    }

    async fn delete_pattern(&self, pattern: &str) {
        match self.store.delete_matching(pattern).await {
            Ok(removed) => debug!(pattern = %pattern, removed, "Deleted matching cache keys"),
            Err(e) => warn!(pattern = %pattern, error = %e, "Cache pattern invalidation failed"),
        }
    }
}
