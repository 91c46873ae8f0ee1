//! SQLite AggregateStore implementation.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::interfaces::aggregate_store::{AggregateStore, Result, StorageError, UnitOfWork};
use crate::model::{
    ExternalUpdate, Segment, SegmentAggregates, SegmentDraft, SegmentId, SegmentPage, Work,
    WorkId, WorkStatus,
};
use crate::storage::schema::{
    Segments, Works, CREATE_SEGMENTS_TABLE, CREATE_SEGMENTS_WORK_INDEX, CREATE_WORKS_TABLE,
};

const WORK_COLUMNS: [Works; 11] = [
    Works::Id,
    Works::PublicId,
    Works::Title,
    Works::Status,
    Works::SegmentCount,
    Works::TotalWordCount,
    Works::AvgRating,
    Works::ReviewCount,
    Works::VoteCount,
    Works::CreatedAt,
    Works::UpdatedAt,
];

const SEGMENT_COLUMNS: [Segments; 9] = [
    Segments::Id,
    Segments::WorkId,
    Segments::Ordinal,
    Segments::Title,
    Segments::WordCount,
    Segments::Valid,
    Segments::CreatedAt,
    Segments::UpdatedAt,
    Segments::DeletedAt,
];

/// SQLite implementation of AggregateStore.
///
/// Units of work are deferred transactions whose first statement is the
/// `lock_work` touch of the parent row. That write takes SQLite's reserved
/// lock, so units of work are serialized database-wide rather than per row.
pub struct SqliteAggregateStore {
    pool: SqlitePool,
}

impl SqliteAggregateStore {
    /// Create a new SQLite aggregate store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_WORKS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_SEGMENTS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_SEGMENTS_WORK_INDEX)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp {:?}: {}", value, e)))
}

fn work_from_row(row: &SqliteRow) -> Result<Work> {
    let public_id: String = row.try_get("public_id")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Work {
        id: WorkId(row.try_get("id")?),
        public_id: Uuid::parse_str(&public_id)
            .map_err(|e| StorageError::Corrupt(format!("public_id: {}", e)))?,
        title: row.try_get("title")?,
        status: status.parse::<WorkStatus>().map_err(StorageError::Corrupt)?,
        segment_count: row.try_get("segment_count")?,
        total_word_count: row.try_get("total_word_count")?,
        avg_rating: row.try_get("avg_rating")?,
        review_count: row.try_get("review_count")?,
        vote_count: row.try_get("vote_count")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn segment_from_row(row: &SqliteRow) -> Result<Segment> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let deleted_at: Option<String> = row.try_get("deleted_at")?;

    Ok(Segment {
        id: SegmentId(row.try_get("id")?),
        work_id: WorkId(row.try_get("work_id")?),
        ordinal: row.try_get("ordinal")?,
        title: row.try_get("title")?,
        word_count: row.try_get("word_count")?,
        valid: row.try_get("valid")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        deleted_at: deleted_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

// Statement helpers shared by pool-level calls and units of work.

async fn select_work(conn: &mut SqliteConnection, id: WorkId) -> Result<Option<Work>> {
    let query = Query::select()
        .columns(WORK_COLUMNS)
        .from(Works::Table)
        .and_where(Expr::col(Works::Id).eq(id.0))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.as_ref().map(work_from_row).transpose()
}

async fn select_segment(conn: &mut SqliteConnection, id: SegmentId) -> Result<Option<Segment>> {
    let query = Query::select()
        .columns(SEGMENT_COLUMNS)
        .from(Segments::Table)
        .and_where(Expr::col(Segments::Id).eq(id.0))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;
    row.as_ref().map(segment_from_row).transpose()
}

async fn select_segment_aggregates(
    conn: &mut SqliteConnection,
    work_id: WorkId,
) -> Result<SegmentAggregates> {
    let query = Query::select()
        .expr(Expr::col(Segments::Id).count())
        .expr(Expr::col(Segments::WordCount).sum())
        .from(Segments::Table)
        .and_where(Expr::col(Segments::WorkId).eq(work_id.0))
        .and_where(Expr::col(Segments::Valid).eq(1))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&query).fetch_one(&mut *conn).await?;
    let count: i64 = row.try_get(0)?;
    // SUM over zero rows is NULL
    let total_words: Option<i64> = row.try_get(1)?;

    Ok(SegmentAggregates {
        count: i32::try_from(count)
            .map_err(|_| StorageError::Corrupt(format!("segment count {}", count)))?,
        total_words: total_words.unwrap_or(0),
    })
}

async fn update_work_counters(
    conn: &mut SqliteConnection,
    id: WorkId,
    counters: SegmentAggregates,
) -> Result<()> {
    let query = Query::update()
        .table(Works::Table)
        .values([
            (Works::SegmentCount, counters.count.into()),
            (Works::TotalWordCount, counters.total_words.into()),
            (Works::UpdatedAt, Utc::now().to_rfc3339().into()),
        ])
        .and_where(Expr::col(Works::Id).eq(id.0))
        .to_string(SqliteQueryBuilder);

    let result = sqlx::query(&query).execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::WorkNotFound(id));
    }
    Ok(())
}

#[async_trait]
impl AggregateStore for SqliteAggregateStore {
    async fn read_work(&self, id: WorkId) -> Result<Option<Work>> {
        let mut conn = self.pool.acquire().await?;
        select_work(&mut conn, id).await
    }

    async fn read_segment(&self, id: SegmentId) -> Result<Option<Segment>> {
        let mut conn = self.pool.acquire().await?;
        select_segment(&mut conn, id).await
    }

    async fn list_segments(
        &self,
        work_id: WorkId,
        page: u32,
        page_size: u32,
    ) -> Result<SegmentPage> {
        let query = Query::select()
            .columns(SEGMENT_COLUMNS)
            .from(Segments::Table)
            .and_where(Expr::col(Segments::WorkId).eq(work_id.0))
            .and_where(Expr::col(Segments::DeletedAt).is_null())
            .order_by(Segments::Ordinal, Order::Asc)
            .order_by(Segments::Id, Order::Asc)
            .limit(u64::from(page_size))
            .offset(u64::from(page) * u64::from(page_size))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut segments = Vec::with_capacity(rows.len());
        for row in &rows {
            segments.push(segment_from_row(row)?);
        }

        Ok(SegmentPage {
            work_id,
            page,
            page_size,
            segments,
        })
    }

    async fn read_segment_aggregates(&self, work_id: WorkId) -> Result<SegmentAggregates> {
        let mut conn = self.pool.acquire().await?;
        select_segment_aggregates(&mut conn, work_id).await
    }

    async fn write_work_counters(&self, id: WorkId, counters: SegmentAggregates) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        update_work_counters(&mut conn, id, counters).await
    }

    async fn apply_external_update(&self, id: WorkId, update: &ExternalUpdate) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        // Built in a block so the statement is dropped before the await
        let query = {
            let mut update_stmt = Query::update();
            update_stmt.table(Works::Table);

            match *update {
                ExternalUpdate::Rating {
                    avg_rating,
                    review_count,
                } => {
                    update_stmt.values([
                        (Works::AvgRating, avg_rating.into()),
                        (Works::ReviewCount, review_count.into()),
                        (Works::UpdatedAt, now.into()),
                    ]);
                }
                ExternalUpdate::VoteCount { vote_count } => {
                    update_stmt.values([
                        (Works::VoteCount, vote_count.into()),
                        (Works::UpdatedAt, now.into()),
                    ]);
                }
            }

            update_stmt
                .and_where(Expr::col(Works::Id).eq(id.0))
                .to_string(SqliteQueryBuilder)
        };

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::WorkNotFound(id));
        }

        debug!(work_id = %id, "Applied external update");
        Ok(())
    }

    async fn create_work(&self, title: &str) -> Result<Work> {
        let now = Utc::now().to_rfc3339();

        let query = Query::insert()
            .into_table(Works::Table)
            .columns([
                Works::PublicId,
                Works::Title,
                Works::Status,
                Works::CreatedAt,
                Works::UpdatedAt,
            ])
            .values_panic([
                Uuid::new_v4().to_string().into(),
                title.into(),
                WorkStatus::Draft.as_str().into(),
                now.clone().into(),
                now.into(),
            ])
            .to_string(SqliteQueryBuilder);

        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(&query).execute(&mut *conn).await?;
        let id = WorkId(result.last_insert_rowid());

        select_work(&mut conn, id)
            .await?
            .ok_or(StorageError::WorkNotFound(id))
    }

    async fn update_work_status(&self, id: WorkId, status: WorkStatus) -> Result<()> {
        let query = Query::update()
            .table(Works::Table)
            .values([
                (Works::Status, status.as_str().into()),
                (Works::UpdatedAt, Utc::now().to_rfc3339().into()),
            ])
            .and_where(Expr::col(Works::Id).eq(id.0))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::WorkNotFound(id));
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteUnitOfWork {
            tx,
            locked: HashSet::new(),
        }))
    }
}

/// Transaction-backed unit of work. Dropping it without commit rolls back.
pub struct SqliteUnitOfWork {
    tx: Transaction<'static, Sqlite>,
    locked: HashSet<WorkId>,
}

impl SqliteUnitOfWork {
    fn require_locked(&self, id: WorkId) -> Result<()> {
        if self.locked.contains(&id) {
            Ok(())
        } else {
            Err(StorageError::WorkNotLocked(id))
        }
    }

    /// Load a segment and check its parent work is locked.
    async fn locked_segment(&mut self, id: SegmentId) -> Result<Segment> {
        let segment = select_segment(&mut self.tx, id)
            .await?
            .ok_or(StorageError::SegmentNotFound(id))?;
        self.require_locked(segment.work_id)?;
        Ok(segment)
    }

    async fn reload_segment(&mut self, id: SegmentId) -> Result<Segment> {
        select_segment(&mut self.tx, id)
            .await?
            .ok_or(StorageError::SegmentNotFound(id))
    }
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    async fn lock_work(&mut self, id: WorkId) -> Result<Work> {
        // A no-op write on the parent row stands in for SELECT ... FOR UPDATE.
        let query = Query::update()
            .table(Works::Table)
            .value(Works::LockVersion, Expr::col(Works::LockVersion).add(1))
            .and_where(Expr::col(Works::Id).eq(id.0))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::WorkNotFound(id));
        }
        self.locked.insert(id);

        select_work(&mut self.tx, id)
            .await?
            .ok_or(StorageError::WorkNotFound(id))
    }

    async fn insert_segment(&mut self, work_id: WorkId, draft: &SegmentDraft) -> Result<Segment> {
        self.require_locked(work_id)?;
        let now = Utc::now().to_rfc3339();

        let query = Query::insert()
            .into_table(Segments::Table)
            .columns([
                Segments::WorkId,
                Segments::Ordinal,
                Segments::Title,
                Segments::WordCount,
                Segments::Valid,
                Segments::CreatedAt,
                Segments::UpdatedAt,
            ])
            .values_panic([
                work_id.0.into(),
                draft.ordinal.into(),
                draft.title.as_str().into(),
                draft.word_count.into(),
                i32::from(draft.valid).into(),
                now.clone().into(),
                now.into(),
            ])
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *self.tx).await?;
        self.reload_segment(SegmentId(result.last_insert_rowid()))
            .await
    }

    async fn update_segment(&mut self, id: SegmentId, draft: &SegmentDraft) -> Result<Segment> {
        let current = self.locked_segment(id).await?;
        if current.deleted_at.is_some() {
            return Err(StorageError::SegmentNotFound(id));
        }

        let query = Query::update()
            .table(Segments::Table)
            .values([
                (Segments::Ordinal, draft.ordinal.into()),
                (Segments::Title, draft.title.as_str().into()),
                (Segments::WordCount, draft.word_count.into()),
                (Segments::Valid, i32::from(draft.valid).into()),
                (Segments::UpdatedAt, Utc::now().to_rfc3339().into()),
            ])
            .and_where(Expr::col(Segments::Id).eq(id.0))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *self.tx).await?;
        self.reload_segment(id).await
    }

    async fn delete_segment(&mut self, id: SegmentId) -> Result<Segment> {
        let current = self.locked_segment(id).await?;
        if current.deleted_at.is_some() {
            return Ok(current);
        }

        let now = Utc::now().to_rfc3339();
        let query = Query::update()
            .table(Segments::Table)
            .values([
                (Segments::Valid, 0i32.into()),
                (Segments::DeletedAt, now.clone().into()),
                (Segments::UpdatedAt, now.into()),
            ])
            .and_where(Expr::col(Segments::Id).eq(id.0))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *self.tx).await?;
        self.reload_segment(id).await
    }

    async fn set_segment_published(&mut self, id: SegmentId, published: bool) -> Result<Segment> {
        let current = self.locked_segment(id).await?;
        if current.deleted_at.is_some() {
            return Err(StorageError::SegmentNotFound(id));
        }

        let query = Query::update()
            .table(Segments::Table)
            .values([
                (Segments::Valid, i32::from(published).into()),
                (Segments::UpdatedAt, Utc::now().to_rfc3339().into()),
            ])
            .and_where(Expr::col(Segments::Id).eq(id.0))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *self.tx).await?;
        self.reload_segment(id).await
    }

    async fn read_segment(&mut self, id: SegmentId) -> Result<Option<Segment>> {
        select_segment(&mut self.tx, id).await
    }

    async fn read_segment_aggregates(&mut self, work_id: WorkId) -> Result<SegmentAggregates> {
        select_segment_aggregates(&mut self.tx, work_id).await
    }

    async fn write_work_counters(
        &mut self,
        id: WorkId,
        counters: SegmentAggregates,
    ) -> Result<()> {
        self.require_locked(id)?;
        update_work_counters(&mut self.tx, id, counters).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
