//! Folio - derived work statistics
//!
//! Keeps a work's aggregate counters consistent with their sources:
//! segment-derived counters are recomputed from the segment rows inside the
//! same transaction as every segment write, and externally computed rating
//! and vote counters are overwritten from at-least-once event streams with
//! exactly-once effect through a two-tier idempotency ledger. A namespaced
//! read-through cache sits in front of the store and is invalidated by every
//! write path.

pub mod bus;
pub mod config;
pub mod interfaces;
pub mod model;
pub mod services;
pub mod storage;
pub mod utils;
