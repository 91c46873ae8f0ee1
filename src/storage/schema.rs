//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Works table schema.
#[derive(Iden)]
pub enum Works {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "public_id"]
    PublicId,
    #[iden = "title"]
    Title,
    #[iden = "status"]
    Status,
    #[iden = "segment_count"]
    SegmentCount,
    #[iden = "total_word_count"]
    TotalWordCount,
    #[iden = "avg_rating"]
    AvgRating,
    #[iden = "review_count"]
    ReviewCount,
    #[iden = "vote_count"]
    VoteCount,
    #[iden = "lock_version"]
    LockVersion,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Segments table schema.
#[derive(Iden)]
pub enum Segments {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "work_id"]
    WorkId,
    #[iden = "ordinal"]
    Ordinal,
    #[iden = "title"]
    Title,
    #[iden = "word_count"]
    WordCount,
    #[iden = "valid"]
    Valid,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "deleted_at"]
    DeletedAt,
}

/// Processed-events table schema (durable ledger tier).
#[derive(Iden)]
pub enum ProcessedEvents {
    Table,
    #[iden = "idempotency_key"]
    IdempotencyKey,
    #[iden = "event_kind"]
    EventKind,
    #[iden = "processed_at"]
    ProcessedAt,
    #[iden = "expires_at_ms"]
    ExpiresAtMs,
}

/// SQL for creating the works table.
pub const CREATE_WORKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS works (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    public_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    segment_count INTEGER NOT NULL DEFAULT 0,
    total_word_count INTEGER NOT NULL DEFAULT 0,
    avg_rating REAL NOT NULL DEFAULT 0,
    review_count INTEGER NOT NULL DEFAULT 0,
    vote_count INTEGER NOT NULL DEFAULT 0,
    lock_version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL for creating the segments table.
pub const CREATE_SEGMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS segments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    work_id INTEGER NOT NULL REFERENCES works(id),
    ordinal INTEGER NOT NULL,
    title TEXT NOT NULL,
    word_count INTEGER NOT NULL DEFAULT 0,
    valid INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
)
"#;

/// Index backing the per-work aggregate and list queries.
pub const CREATE_SEGMENTS_WORK_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_segments_work_valid ON segments(work_id, valid)";

/// SQL for creating the processed-events table (durable ledger tier).
///
/// The primary key is the dedup gate: at most one row per (key, kind).
pub const CREATE_PROCESSED_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS processed_events (
    idempotency_key TEXT NOT NULL,
    event_kind TEXT NOT NULL,
    processed_at TEXT NOT NULL,
    expires_at_ms INTEGER NOT NULL,
    PRIMARY KEY (idempotency_key, event_kind)
)
"#;

/// Index backing retention purges.
pub const CREATE_PROCESSED_EVENTS_EXPIRY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_processed_events_expiry ON processed_events(expires_at_ms)";
