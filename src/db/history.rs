use tracing::{debug, info};

use crate::db::models::{SightingRow, SnapshotRow};
use crate::error::PersistenceError;
use crate::history::{DiffPlan, HistoryIndex};

/// Append-only store for snapshots, chunk identities, listing sightings and
/// snapshot/chunk events.
#[derive(Debug, Clone)]
pub struct HistoryWriter {
    pool: sqlx::SqlitePool,
}

impl HistoryWriter {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Rebuild the in-memory index from what is already on disk. Sightings
    /// older than `retention_secs` before the realm's latest snapshot stay on
    /// disk but are not loaded; 0 loads everything.
    pub async fn load_index(
        &self,
        retention_secs: u64,
    ) -> std::result::Result<HistoryIndex, PersistenceError> {
        let mut index = HistoryIndex::new();

        let snapshots: Vec<SnapshotRow> = sqlx::query_as("SELECT realm, snapshot_ts FROM snapshots")
            .fetch_all(&self.pool)
            .await
            .map_err(PersistenceError::History)?;
        for row in &snapshots {
            index.insert_snapshot(&row.realm, row.snapshot_ts);
        }

        let window = if retention_secs == 0 { i64::MAX } else { retention_secs as i64 };
        let sightings: Vec<SightingRow> = sqlx::query_as(
            r#"
            SELECT h.realm, l.listing_id, l.chunk_id, l.last_seen
            FROM chunk_listings l
            JOIN historical_chunks h ON h.chunk_id = l.chunk_id
            WHERE l.last_seen >= (
                SELECT MAX(s.snapshot_ts) FROM snapshots s WHERE s.realm = h.realm
            ) - ?
            ORDER BY l.last_seen ASC, l.chunk_id ASC
            "#,
        )
        .bind(window)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistenceError::History)?;
        for row in &sightings {
            index.insert_sighting(&row.realm, row.listing_id as u64, row.chunk_id, row.last_seen);
        }

        let max_id: Option<i64> = sqlx::query_scalar("SELECT MAX(chunk_id) FROM historical_chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(PersistenceError::History)?;
        if let Some(id) = max_id {
            index.bump_next_id(id);
        }

        info!(
            snapshots = snapshots.len(),
            sightings = sightings.len(),
            next_chunk_id = index.next_chunk_id(),
            "History index loaded"
        );
        Ok(index)
    }

    /// Write a plan in one transaction. Returns `false` when the snapshot row
    /// already existed, in which case nothing else is written.
    pub async fn commit(&self, plan: &DiffPlan) -> std::result::Result<bool, PersistenceError> {
        let mut tx = self.pool.begin().await.map_err(PersistenceError::History)?;

        let inserted = sqlx::query(
            "INSERT INTO snapshots (realm, snapshot_ts) VALUES (?, ?) ON CONFLICT(realm, snapshot_ts) DO NOTHING",
        )
        .bind(&plan.realm)
        .bind(plan.snapshot_ts)
        .execute(&mut *tx)
        .await
        .map_err(PersistenceError::History)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(PersistenceError::History)?;
            debug!(realm = %plan.realm, ts = plan.snapshot_ts, "Snapshot already on disk");
            return Ok(false);
        }
        let snapshot_id = inserted.last_insert_rowid();

        for chunk in &plan.new_chunks {
            sqlx::query(
                r#"
                INSERT INTO historical_chunks (
                    chunk_id, realm, item_id, unit_price, stack_size, time_left, first_seen
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(chunk.chunk_id)
            .bind(&plan.realm)
            .bind(i64::from(chunk.key.item_id))
            .bind(chunk.key.unit_price as i64)
            .bind(i64::from(chunk.key.stack_size))
            .bind(chunk.key.time_left.as_str())
            .bind(chunk.first_seen)
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::History)?;
        }

        for &(chunk_id, listing_id) in &plan.sightings {
            sqlx::query(
                r#"
                INSERT INTO chunk_listings (chunk_id, listing_id, last_seen) VALUES (?, ?, ?)
                ON CONFLICT(chunk_id, listing_id)
                DO UPDATE SET last_seen = MAX(chunk_listings.last_seen, excluded.last_seen)
                "#,
            )
            .bind(chunk_id)
            .bind(listing_id as i64)
            .bind(plan.snapshot_ts)
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::History)?;
        }

        for &chunk_id in &plan.events {
            sqlx::query(
                "INSERT OR IGNORE INTO snapshot_chunk_events (snapshot_id, chunk_id) VALUES (?, ?)",
            )
            .bind(snapshot_id)
            .bind(chunk_id)
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::History)?;
        }

        tx.commit().await.map_err(PersistenceError::History)?;
        Ok(true)
    }

    #[cfg(test)]
    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }

    #[cfg(test)]
    pub async fn snapshot_count(&self, realm: &str) -> std::result::Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM snapshots WHERE realm = ?")
            .bind(realm)
            .fetch_one(&self.pool)
            .await
    }

    #[cfg(test)]
    pub async fn event_count(&self, realm: &str) -> std::result::Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM snapshot_chunk_events e
            JOIN snapshots s ON s.id = e.snapshot_id
            WHERE s.realm = ?
            "#,
        )
        .bind(realm)
        .fetch_one(&self.pool)
        .await
    }

    /// `last_seen` of a listing under a given chunk, if recorded.
    #[cfg(test)]
    pub async fn last_seen(
        &self,
        chunk_id: i64,
        listing_id: u64,
    ) -> std::result::Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar("SELECT last_seen FROM chunk_listings WHERE chunk_id = ? AND listing_id = ?")
            .bind(chunk_id)
            .bind(listing_id as i64)
            .fetch_optional(&self.pool)
            .await
    }
}
