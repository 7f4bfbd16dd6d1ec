/// Database row types for the catalog and historical stores.

#[derive(Debug, sqlx::FromRow)]
pub struct RealmRow {
    pub slug: String,
    pub name: String,
    pub update_interval: i64,
    pub last_update: i64,
    pub last_check: i64,
    pub json_link: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct TrackedSellerRow {
    pub realm_slug: String,
    pub owner: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ItemRow {
    pub item_id: i64,
    pub name: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct StackSizeRow {
    pub item_id: i64,
    pub stack_size: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SnapshotRow {
    pub realm: String,
    pub snapshot_ts: i64,
}

/// One `chunk_listings` row joined with its chunk's realm.
#[derive(Debug, sqlx::FromRow)]
pub struct SightingRow {
    pub realm: String,
    pub listing_id: i64,
    pub chunk_id: i64,
    pub last_seen: i64,
}
