//! Statistics maintenance services.
//!
//! - `segments` + `recalculator`: segment writes with same-transaction
//!   recompute of derived counters
//! - `consumer` + `ledger`: idempotent application of external rating and
//!   vote-count events
//! - `cache`, `queries`, `admin`: read-through caching and the write-side
//!   invalidation hooks

pub mod admin;
pub mod cache;
pub mod consumer;
pub mod ledger;
pub mod queries;
pub mod recalculator;
pub mod segments;

pub use admin::WorkAdmin;
pub use cache::{CacheCoordinator, CacheKeys, CacheNamespace, EntityKind};
pub use consumer::{
    ConsumerError, ConsumerStatsSnapshot, Disposition, ExternalEvent, ExternalEventConsumer,
    PayloadError,
};
pub use ledger::TieredLedger;
pub use queries::{WorkQueries, WorkStatistics};
pub use recalculator::StatisticsRecalculator;
pub use segments::{SegmentError, SegmentService};
