use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::api::health::{HealthState, RoundSummary};
use crate::api::latency::LatencyStats;
use crate::coordinator::now_secs;
use crate::scheduler::{is_due, next_poll_at};
use crate::state::SnapshotStore;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<SnapshotStore>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub grace_secs: u64,
    pub probe_cooldown_secs: u64,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/realms", get(get_realms))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub uptime_secs: u64,
    pub realms: usize,
    pub realms_with_data: usize,
    pub rounds_completed: u64,
    pub realms_updated: u64,
    pub fetch_failures: u64,
    pub pending_commits: u64,
    pub last_round: Option<RoundSummary>,
}

#[derive(Serialize)]
pub struct RealmStatus {
    pub slug: String,
    pub name: String,
    pub last_update: i64,
    pub last_check: i64,
    pub next_poll_at: i64,
    pub due: bool,
    /// Source version of the snapshot currently held, if any.
    pub version: Option<i64>,
    pub chunks: usize,
    /// Units on sale across every chunk of the latest snapshot.
    pub quantity: u64,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let now = now_secs().max(0) as u64;
    Json(HealthResponse {
        uptime_secs: now.saturating_sub(state.health.started_at()),
        realms: state.store.realms().len(),
        realms_with_data: state.store.realm_count(),
        rounds_completed: state.health.rounds_completed(),
        realms_updated: state.health.realms_updated(),
        fetch_failures: state.health.fetch_failures(),
        pending_commits: state.health.pending_commits(),
        last_round: state.health.last_round(),
    })
}

async fn get_realms(State(state): State<ApiState>) -> Json<Vec<RealmStatus>> {
    let now = now_secs();
    let realms = state
        .store
        .realms()
        .into_iter()
        .map(|r| RealmStatus {
            next_poll_at: next_poll_at(&r, state.probe_cooldown_secs),
            due: is_due(&r, now, state.grace_secs),
            version: state.store.version(&r.slug),
            chunks: state.store.chunk_count(&r.slug),
            quantity: state.store.get(&r.slug).map_or(0, |s| s.total_quantity()),
            slug: r.slug,
            name: r.name,
            last_update: r.last_update,
            last_check: r.last_check,
        })
        .collect();
    Json(realms)
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50_ms, p95_ms, p99_ms) = state.latency.percentiles();
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms,
        p95_ms,
        p99_ms,
    })
}
