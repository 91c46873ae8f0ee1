//! Domain records owned by the aggregate store.
//!
//! A `Work` carries two families of counters:
//! - segment-derived (`segment_count`, `total_word_count`), always recomputed
//!   from the segment rows and never adjusted incrementally
//! - externally computed (`avg_rating`, `review_count`, `vote_count`),
//!   overwritten verbatim from rating/vote events

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Surrogate key of a work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(pub i64);

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Surrogate key of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub i64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    #[default]
    Draft,
    Ongoing,
    Completed,
    Hidden,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Draft => "draft",
            WorkStatus::Ongoing => "ongoing",
            WorkStatus::Completed => "completed",
            WorkStatus::Hidden => "hidden",
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkStatus::Draft),
            "ongoing" => Ok(WorkStatus::Ongoing),
            "completed" => Ok(WorkStatus::Completed),
            "hidden" => Ok(WorkStatus::Hidden),
            other => Err(format!("unknown work status: {}", other)),
        }
    }
}

/// The parent content entity whose statistics are maintained.
///
/// This is also the value cached under the work snapshot namespace, so it
/// round-trips through JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    pub id: WorkId,
    pub public_id: Uuid,
    pub title: String,
    pub status: WorkStatus,
    pub segment_count: i32,
    pub total_word_count: i64,
    pub avg_rating: f64,
    pub review_count: i32,
    pub vote_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Work {
    /// Segment-derived counters as currently stored.
    pub fn segment_aggregates(&self) -> SegmentAggregates {
        SegmentAggregates {
            count: self.segment_count,
            total_words: self.total_word_count,
        }
    }
}

/// A child line item contributing to its work's statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub work_id: WorkId,
    pub ordinal: i32,
    pub title: String,
    pub word_count: i32,
    /// Published and not soft-deleted. Only valid segments are counted.
    pub valid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields supplied by the content-editing collaborator when creating or
/// editing a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDraft {
    pub ordinal: i32,
    pub title: String,
    pub word_count: i32,
    pub valid: bool,
}

/// Count and word sum over the valid segments of one work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentAggregates {
    pub count: i32,
    pub total_words: i64,
}

impl SegmentAggregates {
    /// Fold a set of segments, counting only valid ones.
    pub fn from_segments<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> Self {
        segments
            .into_iter()
            .filter(|s| s.valid)
            .fold(Self::default(), |acc, s| Self {
                count: acc.count + 1,
                total_words: acc.total_words + i64::from(s.word_count),
            })
    }
}

/// Overwrite applied to a work's externally owned counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExternalUpdate {
    Rating { avg_rating: f64, review_count: i32 },
    VoteCount { vote_count: i32 },
}

impl ExternalUpdate {
    /// Apply this overwrite to an in-memory work record.
    pub fn apply_to(&self, work: &mut Work) {
        match *self {
            ExternalUpdate::Rating {
                avg_rating,
                review_count,
            } => {
                work.avg_rating = avg_rating;
                work.review_count = review_count;
            }
            ExternalUpdate::VoteCount { vote_count } => {
                work.vote_count = vote_count;
            }
        }
    }
}

/// One page of a work's segment list, ordered by ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPage {
    pub work_id: WorkId,
    pub page: u32,
    pub page_size: u32,
    pub segments: Vec<Segment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(word_count: i32, valid: bool) -> Segment {
        let now = Utc::now();
        Segment {
            id: SegmentId(0),
            work_id: WorkId(1),
            ordinal: 0,
            title: String::new(),
            word_count,
            valid,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_aggregates_count_only_valid_segments() {
        let segments = vec![
            segment(1000, true),
            segment(1500, true),
            segment(9999, false),
            segment(2000, true),
        ];

        let agg = SegmentAggregates::from_segments(&segments);
        assert_eq!(agg.count, 3);
        assert_eq!(agg.total_words, 4500);
    }

    #[test]
    fn test_aggregates_empty() {
        assert_eq!(
            SegmentAggregates::from_segments(&Vec::<Segment>::new()),
            SegmentAggregates::default()
        );
    }

    #[test]
    fn test_work_status_round_trip() {
        for status in [
            WorkStatus::Draft,
            WorkStatus::Ongoing,
            WorkStatus::Completed,
            WorkStatus::Hidden,
        ] {
            assert_eq!(status.as_str().parse::<WorkStatus>(), Ok(status));
        }
        assert!("archived".parse::<WorkStatus>().is_err());
    }
}
