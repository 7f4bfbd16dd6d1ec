pub mod catalog;
pub mod current;
pub mod history;
pub mod models;

use sqlx::migrate::Migrator;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::Result;

pub static CATALOG_MIGRATOR: Migrator = sqlx::migrate!("./migrations/catalog");
pub static CURRENT_MIGRATOR: Migrator = sqlx::migrate!("./migrations/current");
pub static HISTORY_MIGRATOR: Migrator = sqlx::migrate!("./migrations/history");

/// Open (creating if needed) a SQLite database and bring its schema up to date.
pub async fn open(path: &str, migrator: &Migrator) -> Result<SqlitePool> {
    let pool = SqlitePool::connect(&format!("sqlite:{path}?mode=rwc")).await?;
    migrator.run(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database; the connection is never recycled so
/// the data lives as long as the pool.
pub async fn open_in_memory(migrator: &Migrator) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    migrator.run(&pool).await?;
    Ok(pool)
}
