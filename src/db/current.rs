use tracing::debug;

use crate::error::PersistenceError;
use crate::types::AuctionChunk;

/// Replace-on-write "market right now" table, one row per chunk.
#[derive(Debug, Clone)]
pub struct CurrentStateWriter {
    pool: sqlx::SqlitePool,
}

impl CurrentStateWriter {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Swap a realm's rows for `chunks` in one transaction. Readers never see a
    /// half-written realm.
    pub async fn replace_realm(
        &self,
        realm: &str,
        snapshot_ts: i64,
        chunks: &[AuctionChunk],
    ) -> std::result::Result<(), PersistenceError> {
        let mut tx = self.pool.begin().await.map_err(PersistenceError::CurrentState)?;

        sqlx::query("DELETE FROM current_chunks WHERE realm = ?")
            .bind(realm)
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::CurrentState)?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO current_chunks (
                    realm, item_id, quantity, unit_price, unit_price_minor,
                    stack_size, time_left, snapshot_ts
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(realm)
            .bind(i64::from(chunk.item_id))
            .bind(i64::from(chunk.quantity))
            .bind(chunk.unit_price_major())
            .bind(chunk.unit_price as i64)
            .bind(i64::from(chunk.stack_size))
            .bind(chunk.time_left.as_str())
            .bind(snapshot_ts)
            .execute(&mut *tx)
            .await
            .map_err(PersistenceError::CurrentState)?;
        }

        tx.commit().await.map_err(PersistenceError::CurrentState)?;
        debug!(realm, rows = chunks.len(), "Current state replaced");
        Ok(())
    }

    #[cfg(test)]
    pub async fn row_count(&self, realm: &str) -> std::result::Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM current_chunks WHERE realm = ?")
            .bind(realm)
            .fetch_one(&self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_in_memory, CURRENT_MIGRATOR};
    use crate::types::TimeLeft;

    fn chunk(price: u64, qty: u32) -> AuctionChunk {
        AuctionChunk {
            item_id: 5,
            unit_price: price,
            stack_size: 20,
            time_left: TimeLeft::VeryLong,
            quantity: qty,
            listing_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn replace_drops_previous_rows_for_realm_only() {
        let pool = open_in_memory(&CURRENT_MIGRATOR).await.unwrap();
        let writer = CurrentStateWriter::new(pool.clone());

        writer.replace_realm("draenor", 100, &[chunk(100, 1), chunk(200, 2)]).await.unwrap();
        writer.replace_realm("silvermoon", 100, &[chunk(300, 1)]).await.unwrap();
        writer.replace_realm("draenor", 200, &[chunk(150, 4)]).await.unwrap();

        assert_eq!(writer.row_count("draenor").await.unwrap(), 1);
        assert_eq!(writer.row_count("silvermoon").await.unwrap(), 1);

        let (qty, price, minor): (i64, f64, i64) = sqlx::query_as(
            "SELECT quantity, unit_price, unit_price_minor FROM current_chunks WHERE realm = 'draenor'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(qty, 4);
        assert_eq!(minor, 150);
        assert!((price - 0.015).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_snapshot_clears_realm() {
        let writer = CurrentStateWriter::new(open_in_memory(&CURRENT_MIGRATOR).await.unwrap());
        writer.replace_realm("draenor", 100, &[chunk(100, 1)]).await.unwrap();
        writer.replace_realm("draenor", 200, &[]).await.unwrap();
        assert_eq!(writer.row_count("draenor").await.unwrap(), 0);
    }
}
