//! Historical diff: decides chunk identity across snapshots and appends the
//! forward-only event log.

pub mod diff;

pub use diff::{DiffOutcome, DiffPlan, HistoryIndex};

use tracing::{debug, info};

use crate::db::history::HistoryWriter;
use crate::error::{PersistenceError, Result};
use crate::types::AuctionChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    AlreadyRecorded,
    Recorded {
        new_chunks: usize,
        continued: usize,
        events: usize,
    },
}

/// Owns the in-memory identity index and its backing store. Only the
/// coordinator holds one, so a realm's check-then-insert never interleaves.
#[derive(Debug)]
pub struct HistoryRecorder {
    index: HistoryIndex,
    writer: HistoryWriter,
    /// How long a listing stays in the identity index after it was last seen.
    /// 0 keeps every listing.
    retention_secs: u64,
}

impl HistoryRecorder {
    pub async fn open(
        writer: HistoryWriter,
        retention_secs: u64,
    ) -> std::result::Result<Self, PersistenceError> {
        let index = writer.load_index(retention_secs).await?;
        Ok(Self { index, writer, retention_secs })
    }

    #[cfg(test)]
    pub fn index(&self) -> &HistoryIndex {
        &self.index
    }

    /// Record `tracked` as the realm's snapshot at `snapshot_ts`.
    ///
    /// The index is only updated after the store commits, so a failure at any
    /// point leaves both exactly as they were.
    pub async fn record(
        &mut self,
        realm: &str,
        snapshot_ts: i64,
        tracked: &[AuctionChunk],
    ) -> Result<RecordOutcome> {
        let plan = match self.index.plan(realm, snapshot_ts, tracked)? {
            DiffOutcome::AlreadyRecorded => {
                debug!(realm, snapshot_ts, "Snapshot already recorded, skipping diff");
                return Ok(RecordOutcome::AlreadyRecorded);
            }
            DiffOutcome::Planned(plan) => plan,
        };

        if !self.writer.commit(&plan).await? {
            self.index.insert_snapshot(realm, snapshot_ts);
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        self.index.apply(&plan);

        if self.retention_secs > 0 {
            let cutoff = snapshot_ts.saturating_sub(self.retention_secs as i64);
            let pruned = self.index.prune(realm, cutoff);
            if pruned > 0 {
                debug!(
                    realm,
                    pruned,
                    remaining = self.index.listing_count(realm),
                    "Expired listings dropped from identity index"
                );
            }
        }

        let outcome = RecordOutcome::Recorded {
            new_chunks: plan.new_chunks.len(),
            continued: plan.continued,
            events: plan.events.len(),
        };
        info!(
            realm,
            snapshot_ts,
            new_chunks = plan.new_chunks.len(),
            continued = plan.continued,
            events = plan.events.len(),
            "History recorded"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_in_memory, HISTORY_MIGRATOR};
    use crate::error::AppError;
    use crate::types::TimeLeft;

    fn chunk(price: u64, ids: &[u64]) -> AuctionChunk {
        AuctionChunk {
            item_id: 5,
            unit_price: price,
            stack_size: 10,
            time_left: TimeLeft::Short,
            quantity: ids.len() as u32,
            listing_ids: ids.to_vec(),
        }
    }

    async fn recorder() -> (HistoryRecorder, HistoryWriter) {
        let writer = HistoryWriter::new(open_in_memory(&HISTORY_MIGRATOR).await.unwrap());
        (HistoryRecorder::open(writer.clone(), 0).await.unwrap(), writer)
    }

    #[tokio::test]
    async fn record_is_idempotent_per_timestamp() {
        let (mut rec, writer) = recorder().await;
        let chunks = [chunk(100, &[1]), chunk(200, &[2])];

        let first = rec.record("draenor", 100, &chunks).await.unwrap();
        let second = rec.record("draenor", 100, &chunks).await.unwrap();

        assert!(matches!(first, RecordOutcome::Recorded { events: 2, .. }));
        assert_eq!(second, RecordOutcome::AlreadyRecorded);
        assert_eq!(writer.snapshot_count("draenor").await.unwrap(), 1);
        assert_eq!(writer.event_count("draenor").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn violation_aborts_without_writing() {
        let (mut rec, writer) = recorder().await;
        let err = rec
            .record("draenor", 100, &[chunk(100, &[1]), chunk(200, &[1])])
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Diff(_)));
        assert_eq!(writer.snapshot_count("draenor").await.unwrap(), 0);
        assert!(!rec.index().has_snapshot("draenor", 100));
    }

    #[tokio::test]
    async fn stable_listings_keep_chunk_id_across_polls() {
        let (mut rec, writer) = recorder().await;
        rec.record("draenor", 100, &[chunk(100, &[7])]).await.unwrap();
        let id = rec.index().chunk_for_listing("draenor", 7).unwrap();

        let outcome = rec.record("draenor", 200, &[chunk(100, &[7])]).await.unwrap();
        assert_eq!(
            outcome,
            RecordOutcome::Recorded { new_chunks: 0, continued: 1, events: 1 }
        );
        assert_eq!(rec.index().chunk_for_listing("draenor", 7), Some(id));
        assert_eq!(writer.last_seen(id, 7).await.unwrap(), Some(200));
    }

    #[tokio::test]
    async fn expired_listings_leave_the_index_but_not_the_store() {
        let writer = HistoryWriter::new(open_in_memory(&HISTORY_MIGRATOR).await.unwrap());
        let mut rec = HistoryRecorder::open(writer.clone(), 3600).await.unwrap();

        rec.record("draenor", 1_000, &[chunk(100, &[7])]).await.unwrap();
        let id = rec.index().chunk_for_listing("draenor", 7).unwrap();
        rec.record("draenor", 10_000, &[chunk(200, &[8])]).await.unwrap();

        assert_eq!(rec.index().chunk_for_listing("draenor", 7), None);
        assert!(rec.index().chunk_for_listing("draenor", 8).is_some());
        assert_eq!(writer.last_seen(id, 7).await.unwrap(), Some(1_000));
    }
}
