//! Abstract interfaces for folio components.
//!
//! These traits define the contracts for:
//! - Aggregate storage (works, segments, transactional units of work)
//! - Idempotency ledger tiers (processed-event markers)
//! - Cache storage (TTL'd read-through accelerator)

pub mod aggregate_store;
pub mod cache_store;
pub mod ledger;

pub use aggregate_store::{AggregateStore, StorageError, UnitOfWork};
pub use cache_store::{CacheError, CacheStore};
pub use ledger::{
    EventKind, IdempotencyKey, IdempotencyLedger, IdempotencyRecord, LedgerError, LedgerTier,
};
