mod api;
mod cluster;
mod config;
mod coordinator;
mod db;
mod error;
mod fetcher;
mod history;
mod scheduler;
mod state;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, RunMode};
use crate::coordinator::{now_secs, Coordinator};
use crate::db::catalog::Catalog;
use crate::db::current::CurrentStateWriter;
use crate::db::history::HistoryWriter;
use crate::error::Result;
use crate::fetcher::BlizzardSource;
use crate::history::HistoryRecorder;
use crate::scheduler::Scheduler;
use crate::state::{Checkpoint, SnapshotStore};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let catalog_pool = db::open(&cfg.catalog_db_path, &db::CATALOG_MIGRATOR).await?;
    let current_pool = db::open(&cfg.current_db_path, &db::CURRENT_MIGRATOR).await?;
    let history_pool = db::open(&cfg.history_db_path, &db::HISTORY_MIGRATOR).await?;
    info!(
        catalog = %cfg.catalog_db_path,
        current = %cfg.current_db_path,
        history = %cfg.history_db_path,
        "Databases ready"
    );

    // --- Reference data ---
    let catalog = Catalog::new(catalog_pool);
    let mut realms = catalog.list_realms().await?;
    for realm in &mut realms {
        realm.tracked_sellers.extend(cfg.tracked_sellers.iter().cloned());
    }
    let items = catalog.list_items().await?;
    info!(realms = realms.len(), items = items.len(), "Catalog loaded");
    if realms.is_empty() {
        warn!("Catalog has no realms; nothing will be polled until realms are added to {}", cfg.catalog_db_path);
    }
    if items.is_empty() {
        warn!("Catalog has no items; every listing will be rejected by clustering");
    }

    // --- In-memory state from the last checkpoint ---
    let checkpoint = Checkpoint::new(cfg.checkpoint_path.clone());
    let store = SnapshotStore::from_snapshots(checkpoint.load().await);

    let history = HistoryRecorder::open(HistoryWriter::new(history_pool), cfg.history_retention_secs).await?;

    let health = Arc::new(HealthState::new(now_secs().max(0) as u64));
    let latency = Arc::new(LatencyStats::new());
    let source = Arc::new(BlizzardSource::new(&cfg)?);

    let coordinator = Coordinator::new(
        cfg.clone(),
        source,
        realms,
        items,
        catalog,
        CurrentStateWriter::new(current_pool),
        history,
        checkpoint,
        Arc::clone(&store),
        Arc::clone(&health),
        Arc::clone(&latency),
    );
    let mut scheduler = Scheduler::new(cfg.clone(), coordinator);

    // --- Status server ---
    if cfg.api_port != 0 {
        let api_state = ApiState {
            store: Arc::clone(&store),
            health: Arc::clone(&health),
            latency: Arc::clone(&latency),
            grace_secs: cfg.grace_secs,
            probe_cooldown_secs: cfg.probe_cooldown_secs,
        };
        let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        info!("Status API listening on {bind_addr}");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router(api_state)).await {
                error!("Status API stopped: {e}");
            }
        });
    }

    match cfg.run_mode {
        RunMode::Once | RunMode::Force => {
            let force = cfg.run_mode == RunMode::Force;
            let summary = scheduler.run_once(force).await;
            if scheduler.coordinator().pending_count() > 0 {
                warn!(
                    pending = scheduler.coordinator().pending_count(),
                    "Exiting with uncommitted results; they will be refetched next run"
                );
            }
            info!(
                updated = summary.updated,
                skipped = summary.skipped,
                fetch_failed = summary.fetch_failed,
                "Batch update finished"
            );
        }
        RunMode::Loop => scheduler.run_loop().await,
    }

    Ok(())
}
