//! Storage configuration types.

use serde::Deserialize;

/// Aggregate store configuration.
///
/// The same database holds the durable idempotency ledger, so a segment
/// write and a ledger marker never live in different failure domains.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite connection URL (`sqlite://path/to/folio.db` or `sqlite::memory:`).
    pub url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://folio.db".to_string(),
        }
    }
}

impl StorageConfig {
    /// Filesystem path of the database, if it is file backed.
    pub fn file_path(&self) -> Option<&str> {
        if self.url.contains(":memory:") {
            return None;
        }
        self.url
            .strip_prefix("sqlite://")
            .or_else(|| self.url.strip_prefix("sqlite:"))
            .map(|rest| rest.split('?').next().unwrap_or(rest))
    }
}
