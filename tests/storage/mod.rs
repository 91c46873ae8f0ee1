//! Shared storage integration tests.
//!
//! Tests the LedgerTier and CacheStore interfaces against every backend.
//! Each backend's test binary imports these functions and runs them.

#![allow(dead_code)]

pub mod cache_store_tests;
pub mod ledger_tier_tests;
