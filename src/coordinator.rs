use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::api::health::{HealthState, RoundSummary};
use crate::api::latency::LatencyStats;
use crate::cluster::{cluster, ClusterStats, StackPolicy};
use crate::config::Config;
use crate::db::catalog::Catalog;
use crate::db::current::CurrentStateWriter;
use crate::error::{AppError, FetchError};
use crate::fetcher::MarketSource;
use crate::history::{HistoryRecorder, RecordOutcome};
use crate::scheduler::is_due;
use crate::state::{Checkpoint, RealmSnapshot, SnapshotStore};
use crate::types::{Item, Realm};

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// A realm's freshly clustered data, with its clocks already advanced to the
/// version it was built from. Nothing shared has been touched yet.
#[derive(Debug, Clone)]
pub struct RealmUpdate {
    pub realm: Realm,
    pub snapshot: RealmSnapshot,
    pub stats: ClusterStats,
}

impl RealmUpdate {
    pub fn version(&self) -> i64 {
        self.snapshot.version
    }
}

#[derive(Debug)]
pub enum WorkerOutcome {
    Updated(RealmUpdate),
    /// Due by the clock, but the source still publishes the version we have.
    Skipped { realm: Realm },
    /// `realm` carries the attempt's `last_check`; `last_update` is untouched.
    Failed { realm: Realm, error: FetchError },
}

/// Everything a worker needs, shared read-only across workers.
#[derive(Clone)]
struct WorkerContext {
    source: Arc<dyn MarketSource>,
    items: Arc<HashMap<u32, Item>>,
    policy: StackPolicy,
    latency: Arc<LatencyStats>,
}

/// Probe, fetch and cluster one realm. Owns its copy of the realm; reports
/// through the return value only.
async fn run_worker(ctx: WorkerContext, mut realm: Realm, force: bool) -> WorkerOutcome {
    let started = Instant::now();
    realm.last_check = now_secs();

    let version = match ctx.source.probe(&realm).await {
        Ok(v) => v,
        Err(error) => return WorkerOutcome::Failed { realm, error },
    };
    realm.json_link = Some(version.dump_url.clone());

    if !force && version.last_modified == realm.last_update {
        debug!(realm = %realm.slug, version = version.last_modified, "Source not updated yet");
        return WorkerOutcome::Skipped { realm };
    }

    let listings = match ctx.source.fetch(&realm, &version.dump_url).await {
        Ok(l) => l,
        Err(error) => return WorkerOutcome::Failed { realm, error },
    };
    ctx.latency.record(started.elapsed());

    // Clustering is CPU-bound; keep it off the async workers.
    let items = Arc::clone(&ctx.items);
    let sellers = realm.tracked_sellers.clone();
    let policy = ctx.policy;
    let output = match tokio::task::spawn_blocking(move || cluster(&listings, &items, &sellers, policy)).await {
        Ok(o) => o,
        Err(e) => {
            return WorkerOutcome::Failed {
                error: FetchError::WorkerLost(format!("{} (clustering: {e})", realm.slug)),
                realm,
            }
        }
    };

    realm.last_update = version.last_modified;
    WorkerOutcome::Updated(RealmUpdate {
        snapshot: RealmSnapshot {
            version: version.last_modified,
            chunks: output.chunks,
            tracked_chunks: output.tracked,
        },
        stats: output.stats,
        realm,
    })
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// How far a failed commit got. Retries resume from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitStage {
    /// Current state, checkpoint and realm clocks not yet durable.
    Merge,
    /// Merge done; only the historical record is missing.
    History,
}

#[derive(Debug)]
struct PendingCommit {
    update: RealmUpdate,
    stage: CommitStage,
}

/// Fans out one worker per realm and is the only writer of the shared stores.
///
/// Workers hand their result back through a private oneshot slot. Once every
/// worker of a round has reported (or timed out), results are merged one realm
/// at a time: current state, checkpoint, realm clocks, then history.
pub struct Coordinator {
    cfg: Config,
    ctx: WorkerContext,
    realms: BTreeMap<String, Realm>,
    catalog: Catalog,
    current: CurrentStateWriter,
    history: HistoryRecorder,
    checkpoint: Checkpoint,
    store: Arc<SnapshotStore>,
    health: Arc<HealthState>,
    /// Commits that failed with a persistence error, oldest first.
    pending: Vec<PendingCommit>,
}

#[allow(clippy::too_many_arguments)]
impl Coordinator {
    pub fn new(
        cfg: Config,
        source: Arc<dyn MarketSource>,
        realms: Vec<Realm>,
        items: Vec<Item>,
        catalog: Catalog,
        current: CurrentStateWriter,
        history: HistoryRecorder,
        checkpoint: Checkpoint,
        store: Arc<SnapshotStore>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        store.set_realms(&realms);
        let ctx = WorkerContext {
            source,
            items: Arc::new(items.into_iter().map(|i| (i.item_id, i)).collect()),
            policy: StackPolicy::from_floor(cfg.min_stack_size),
            latency,
        };
        Self {
            ctx,
            realms: realms.into_iter().map(|r| (r.slug.clone(), r)).collect(),
            cfg,
            catalog,
            current,
            history,
            checkpoint,
            store,
            health,
            pending: Vec::new(),
        }
    }

    pub fn realms(&self) -> impl Iterator<Item = &Realm> {
        self.realms.values()
    }

    pub fn realm(&self, slug: &str) -> Option<&Realm> {
        self.realms.get(slug)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// One batch round: every due realm (every realm when `force`) is polled
    /// concurrently, then merged.
    pub async fn run_round(&mut self, force: bool, now: i64) -> RoundSummary {
        let slugs: Vec<String> = self
            .realms
            .values()
            .filter(|r| force || is_due(r, now, self.cfg.grace_secs))
            .map(|r| r.slug.clone())
            .collect();

        info!(due = slugs.len(), total = self.realms.len(), force, "Starting update round");
        self.update_realms(&slugs, force).await
    }

    /// Retry pending commits, poll `slugs` concurrently, merge the results.
    pub async fn update_realms(&mut self, slugs: &[String], force: bool) -> RoundSummary {
        let mut summary = RoundSummary {
            started_at: now_secs(),
            ..RoundSummary::default()
        };

        self.retry_pending().await;

        let outcomes = self.collect(slugs, force).await;
        summary.realms_polled = outcomes.len();

        for outcome in outcomes {
            match outcome {
                WorkerOutcome::Updated(update) if self.has_pending(&update.realm.slug) => {
                    // Older versions of this realm are still parked; land after them.
                    warn!(
                        realm = %update.realm.slug,
                        version = update.version(),
                        "Earlier commits still pending, queueing update behind them"
                    );
                    summary.commit_failed += 1;
                    self.record_check(&update.realm);
                    self.park(update, CommitStage::Merge);
                }
                WorkerOutcome::Updated(update) => {
                    if self.commit(update, CommitStage::Merge).await {
                        summary.updated += 1;
                    } else {
                        summary.commit_failed += 1;
                    }
                }
                WorkerOutcome::Skipped { realm } => {
                    summary.skipped += 1;
                    self.record_check(&realm);
                    if let Some(known) = self.realms.get(&realm.slug) {
                        if let Err(e) = self.catalog.persist_realm(known).await {
                            warn!(realm = %realm.slug, "Could not persist last_check: {e}");
                        }
                    }
                }
                WorkerOutcome::Failed { realm, error } => {
                    summary.fetch_failed += 1;
                    warn!(realm = %realm.slug, "Fetch failed, realm skipped this round: {error}");
                    self.record_check(&realm);
                }
            }
        }

        summary.pending = self.pending.len();
        self.health.record_round(&summary);
        info!(
            polled = summary.realms_polled,
            updated = summary.updated,
            skipped = summary.skipped,
            fetch_failed = summary.fetch_failed,
            commit_failed = summary.commit_failed,
            pending = summary.pending,
            "Update round complete"
        );
        summary
    }

    /// Spawn one worker per realm and wait for every handoff slot.
    async fn collect(&self, slugs: &[String], force: bool) -> Vec<WorkerOutcome> {
        let timeout = Duration::from_secs(self.cfg.worker_timeout_secs);
        let mut slots = Vec::with_capacity(slugs.len());

        for slug in slugs {
            let Some(mut realm) = self.realms.get(slug).cloned() else {
                warn!(realm = %slug, "Unknown realm requested, ignoring");
                continue;
            };
            // A parked version is already in hand; only a newer one is worth a download.
            if let Some(parked) = self.pending_version(slug) {
                realm.last_update = realm.last_update.max(parked);
            }
            let (tx, rx) = oneshot::channel();
            let ctx = self.ctx.clone();
            let fallback = realm.clone();
            tokio::spawn(async move {
                let outcome = match tokio::time::timeout(timeout, run_worker(ctx, realm.clone(), force)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let mut realm = realm;
                        realm.last_check = now_secs();
                        WorkerOutcome::Failed {
                            realm,
                            error: FetchError::Timeout(timeout.as_secs()),
                        }
                    }
                };
                let _ = tx.send(outcome);
            });
            slots.push((fallback, rx));
        }

        futures_util::future::join_all(slots.into_iter().map(|(mut realm, rx)| async move {
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => {
                    realm.last_check = now_secs();
                    WorkerOutcome::Failed {
                        error: FetchError::WorkerLost(realm.slug.clone()),
                        realm,
                    }
                }
            }
        }))
        .await
    }

    fn has_pending(&self, slug: &str) -> bool {
        self.pending.iter().any(|p| p.update.realm.slug == slug)
    }

    /// Newest version of `slug` waiting in the pending queue.
    fn pending_version(&self, slug: &str) -> Option<i64> {
        self.pending
            .iter()
            .filter(|p| p.update.realm.slug == slug)
            .map(|p| p.update.version())
            .max()
    }

    /// Keep the attempt time even when nothing else moved.
    fn record_check(&mut self, attempted: &Realm) {
        if let Some(realm) = self.realms.get_mut(&attempted.slug) {
            realm.last_check = realm.last_check.max(attempted.last_check);
            if attempted.json_link.is_some() {
                realm.json_link = attempted.json_link.clone();
            }
            self.store.set_realm(realm);
        }
    }

    /// Merge one realm's update, starting at `stage`. Returns `false` when the
    /// update was parked in the pending queue.
    async fn commit(&mut self, update: RealmUpdate, stage: CommitStage) -> bool {
        let slug = update.realm.slug.clone();

        if stage == CommitStage::Merge {
            if let Err(e) = self.merge(&update).await {
                error!(realm = %slug, version = update.version(), "Merge failed, keeping result for retry: {e}");
                self.record_check(&update.realm);
                self.park(update, CommitStage::Merge);
                return false;
            }
        }

        match self
            .history
            .record(&slug, update.version(), &update.snapshot.tracked_chunks)
            .await
        {
            Ok(RecordOutcome::AlreadyRecorded) => {
                debug!(realm = %slug, version = update.version(), "History already had this snapshot");
                true
            }
            Ok(RecordOutcome::Recorded { new_chunks, continued, events }) => {
                debug!(realm = %slug, new_chunks, continued, events, "History recorded");
                true
            }
            Err(AppError::Diff(v)) => {
                // Aborted with nothing written; retrying the same input would fail again.
                error!(realm = %slug, "History diff aborted: {v}");
                true
            }
            Err(e) => {
                error!(realm = %slug, version = update.version(), "History write failed, keeping for retry: {e}");
                self.record_check(&update.realm);
                self.park(update, CommitStage::History);
                false
            }
        }
    }

    /// Current state, checkpoint, then clocks. Clocks move last so a realm is
    /// never marked fresh before its data is durable.
    async fn merge(&mut self, update: &RealmUpdate) -> crate::error::Result<()> {
        let slug = &update.realm.slug;
        let committed = self.realms.get(slug).map_or(i64::MIN, |r| r.last_update);

        // A retried older version must not overwrite newer current state.
        if update.version() < committed {
            debug!(realm = %slug, version = update.version(), committed, "Stale update, skipping merge");
            return Ok(());
        }

        self.current
            .replace_realm(slug, update.version(), &update.snapshot.chunks)
            .await?;
        self.store.replace(slug, update.snapshot.clone());
        self.checkpoint.save(self.store.export()).await?;
        self.catalog.persist_realm(&update.realm).await?;

        let mut realm = update.realm.clone();
        if let Some(known) = self.realms.get(slug) {
            // Tracked sellers may have been reloaded while the worker ran.
            realm.tracked_sellers = known.tracked_sellers.clone();
        }
        self.store.set_realm(&realm);
        self.realms.insert(slug.clone(), realm);

        info!(
            realm = %slug,
            version = update.version(),
            chunks = update.stats.chunks,
            tracked = update.stats.tracked_chunks,
            listings = update.stats.listings_in,
            eligible = update.stats.eligible,
            "Realm merged"
        );
        Ok(())
    }

    fn park(&mut self, update: RealmUpdate, stage: CommitStage) {
        let (slug, version) = (update.realm.slug.clone(), update.version());
        self.pending
            .retain(|p| !(p.update.realm.slug == slug && p.update.version() == version));
        self.pending.push(PendingCommit { update, stage });
        self.health.set_pending(self.pending.len());
    }

    /// Replay parked commits in order. A realm whose retry fails again keeps
    /// its later entries parked too, so versions land in order.
    pub async fn retry_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let queued = std::mem::take(&mut self.pending);
        info!(pending = queued.len(), "Retrying pending commits");

        let mut blocked: Vec<String> = Vec::new();
        for PendingCommit { update, stage } in queued {
            if blocked.contains(&update.realm.slug) {
                self.pending.push(PendingCommit { update, stage });
                continue;
            }
            let slug = update.realm.slug.clone();
            if !self.commit(update, stage).await {
                blocked.push(slug);
            }
        }
        self.health.set_pending(self.pending.len());
    }
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
