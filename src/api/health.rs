//! Shared health state for the /health endpoint.
//! Updated by the coordinator after every round.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Outcome counts of one batch round or loop iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    pub started_at: i64,
    pub realms_polled: usize,
    pub updated: usize,
    pub skipped: usize,
    pub fetch_failed: usize,
    pub commit_failed: usize,
    pub pending: usize,
}

/// Shared health metrics. Updated by the coordinator, read by the API.
#[derive(Default)]
pub struct HealthState {
    pub started_at: AtomicU64,
    pub rounds_completed: AtomicU64,
    pub realms_updated: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub pending_commits: AtomicU64,
    last_round: Mutex<Option<RoundSummary>>,
}

impl HealthState {
    pub fn new(started_at: u64) -> Self {
        let state = Self::default();
        state.started_at.store(started_at, Ordering::Relaxed);
        state
    }

    pub fn record_round(&self, summary: &RoundSummary) {
        self.rounds_completed.fetch_add(1, Ordering::Relaxed);
        self.realms_updated
            .fetch_add(summary.updated as u64, Ordering::Relaxed);
        self.fetch_failures
            .fetch_add(summary.fetch_failed as u64, Ordering::Relaxed);
        self.pending_commits
            .store(summary.pending as u64, Ordering::Relaxed);
        if let Ok(mut last) = self.last_round.lock() {
            *last = Some(summary.clone());
        }
    }

    pub fn set_pending(&self, pending: usize) {
        self.pending_commits.store(pending as u64, Ordering::Relaxed);
    }

    pub fn started_at(&self) -> u64 {
        self.started_at.load(Ordering::Relaxed)
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed.load(Ordering::Relaxed)
    }

    pub fn realms_updated(&self) -> u64 {
        self.realms_updated.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    pub fn pending_commits(&self) -> u64 {
        self.pending_commits.load(Ordering::Relaxed)
    }

    pub fn last_round(&self) -> Option<RoundSummary> {
        self.last_round.lock().ok().and_then(|g| g.clone())
    }
}
