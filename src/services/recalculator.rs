//! Statistics recalculator.
//!
//! Keeps a work's segment-derived counters equal to what its segment rows
//! say. On every segment-set change it re-aggregates the valid segments and
//! overwrites both counters in one write, inside the publisher's unit of
//! work. Counters are never adjusted by a delta, so repeated or reordered
//! recomputes over the same rows land on the same values.

use async_trait::async_trait;
use tracing::debug;

use crate::bus::{SegmentListener, SegmentSetChanged};
use crate::interfaces::aggregate_store::{Result, UnitOfWork};

/// Recomputes `segment_count` and `total_word_count` from truth.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatisticsRecalculator;

impl StatisticsRecalculator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SegmentListener for StatisticsRecalculator {
    fn name(&self) -> &str {
        "statistics-recalculator"
    }

    async fn on_segment_set_changed(
        &self,
        uow: &mut dyn UnitOfWork,
        event: &SegmentSetChanged,
    ) -> Result<()> {
        // No-op if the publisher already holds the lock
        let work = uow.lock_work(event.work_id).await?;

        let counters = uow.read_segment_aggregates(event.work_id).await?;
        uow.write_work_counters(event.work_id, counters).await?;

        debug!(
            work_id = %event.work_id,
            segment_count_before = work.segment_count,
            segment_count = counters.count,
            total_word_count_before = work.total_word_count,
            total_word_count = counters.total_words,
            "Recomputed work statistics"
        );
        Ok(())
    }
}
