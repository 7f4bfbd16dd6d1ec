use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::db::models::{ItemRow, RealmRow, StackSizeRow, TrackedSellerRow};
use crate::error::{PersistenceError, Result};
use crate::types::{Item, Realm};

/// Reference data: realms with their schedule clocks, and the item list.
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: sqlx::SqlitePool,
}

impl Catalog {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_realms(&self) -> Result<Vec<Realm>> {
        let rows: Vec<RealmRow> = sqlx::query_as(
            r#"
            SELECT slug, name, update_interval, last_update, last_check, json_link
            FROM realms
            ORDER BY slug
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let seller_rows: Vec<TrackedSellerRow> =
            sqlx::query_as("SELECT realm_slug, owner FROM realm_tracked_sellers")
                .fetch_all(&self.pool)
                .await?;

        let mut sellers: HashMap<String, HashSet<String>> = HashMap::new();
        for row in seller_rows {
            sellers.entry(row.realm_slug).or_default().insert(row.owner);
        }

        let realms = rows
            .into_iter()
            .map(|r| Realm {
                tracked_sellers: sellers.remove(&r.slug).unwrap_or_default(),
                name: r.name,
                slug: r.slug,
                update_interval: r.update_interval.max(0) as u64,
                last_update: r.last_update,
                last_check: r.last_check,
                json_link: r.json_link,
            })
            .collect();

        Ok(realms)
    }

    pub async fn list_items(&self) -> Result<Vec<Item>> {
        let rows: Vec<ItemRow> = sqlx::query_as("SELECT item_id, name FROM items ORDER BY item_id")
            .fetch_all(&self.pool)
            .await?;
        let size_rows: Vec<StackSizeRow> =
            sqlx::query_as("SELECT item_id, stack_size FROM item_stack_sizes")
                .fetch_all(&self.pool)
                .await?;

        let mut sizes: HashMap<i64, BTreeSet<u32>> = HashMap::new();
        for row in size_rows {
            if let Ok(size) = u32::try_from(row.stack_size) {
                sizes.entry(row.item_id).or_default().insert(size);
            }
        }

        let items = rows
            .into_iter()
            .filter_map(|r| {
                let item_id = u32::try_from(r.item_id).ok()?;
                Some(Item {
                    item_id,
                    name: r.name,
                    valid_stack_sizes: sizes.remove(&r.item_id).unwrap_or_default(),
                })
            })
            .collect();

        Ok(items)
    }

    /// Write back the schedule clocks and dump link. Nothing else about a realm
    /// is owned by this process.
    pub async fn persist_realm(&self, realm: &Realm) -> std::result::Result<(), PersistenceError> {
        sqlx::query(
            r#"
            UPDATE realms
            SET last_update = ?, last_check = ?, json_link = ?
            WHERE slug = ?
            "#,
        )
        .bind(realm.last_update)
        .bind(realm.last_check)
        .bind(&realm.json_link)
        .bind(&realm.slug)
        .execute(&self.pool)
        .await
        .map_err(PersistenceError::Catalog)?;

        debug!(realm = %realm.slug, last_update = realm.last_update, "Realm clocks persisted");
        Ok(())
    }

    /// Seed or overwrite a realm row.
    #[cfg(test)]
    pub async fn upsert_realm(&self, realm: &Realm) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO realms (slug, name, update_interval, last_update, last_check, json_link)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                name = excluded.name,
                update_interval = excluded.update_interval,
                last_update = excluded.last_update,
                last_check = excluded.last_check,
                json_link = excluded.json_link
            "#,
        )
        .bind(&realm.slug)
        .bind(&realm.name)
        .bind(realm.update_interval as i64)
        .bind(realm.last_update)
        .bind(realm.last_check)
        .bind(&realm.json_link)
        .execute(&self.pool)
        .await?;

        for owner in &realm.tracked_sellers {
            sqlx::query("INSERT OR IGNORE INTO realm_tracked_sellers (realm_slug, owner) VALUES (?, ?)")
                .bind(&realm.slug)
                .bind(owner)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn upsert_item(&self, item: &Item) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO items (item_id, name) VALUES (?, ?)")
            .bind(i64::from(item.item_id))
            .bind(&item.name)
            .execute(&self.pool)
            .await?;
        for size in &item.valid_stack_sizes {
            sqlx::query("INSERT OR IGNORE INTO item_stack_sizes (item_id, stack_size) VALUES (?, ?)")
                .bind(i64::from(item.item_id))
                .bind(i64::from(*size))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_in_memory, CATALOG_MIGRATOR};

    fn realm(slug: &str, sellers: &[&str]) -> Realm {
        Realm {
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            update_interval: 3600,
            last_update: 1000,
            last_check: 900,
            json_link: None,
            tracked_sellers: sellers.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn realms_round_trip_with_tracked_sellers() {
        let catalog = Catalog::new(open_in_memory(&CATALOG_MIGRATOR).await.unwrap());
        catalog.upsert_realm(&realm("draenor", &["Alice", "Bob"])).await.unwrap();
        catalog.upsert_realm(&realm("silvermoon", &[])).await.unwrap();

        let realms = catalog.list_realms().await.unwrap();
        assert_eq!(realms.len(), 2);
        assert_eq!(realms[0], realm("draenor", &["Alice", "Bob"]));
        assert!(realms[1].tracked_sellers.is_empty());
    }

    #[tokio::test]
    async fn persist_realm_only_moves_clocks() {
        let catalog = Catalog::new(open_in_memory(&CATALOG_MIGRATOR).await.unwrap());
        catalog.upsert_realm(&realm("draenor", &[])).await.unwrap();

        let mut updated = realm("draenor", &[]);
        updated.last_update = 5000;
        updated.last_check = 5001;
        updated.json_link = Some("https://example.test/auctions.json".to_string());
        updated.update_interval = 1; // not persisted
        catalog.persist_realm(&updated).await.unwrap();

        let stored = &catalog.list_realms().await.unwrap()[0];
        assert_eq!(stored.last_update, 5000);
        assert_eq!(stored.last_check, 5001);
        assert_eq!(stored.json_link.as_deref(), Some("https://example.test/auctions.json"));
        assert_eq!(stored.update_interval, 3600);
    }

    #[tokio::test]
    async fn items_carry_stack_sizes() {
        let catalog = Catalog::new(open_in_memory(&CATALOG_MIGRATOR).await.unwrap());
        catalog
            .upsert_item(&Item {
                item_id: 152505,
                name: "Riverbud".to_string(),
                valid_stack_sizes: BTreeSet::from([1, 20, 200]),
            })
            .await
            .unwrap();

        let items = catalog.list_items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].valid_stack_sizes, BTreeSet::from([1, 20, 200]));
    }
}
