use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::DiffConsistencyViolation;
use crate::types::{AuctionChunk, ChunkId, ChunkKey, ListingId};

/// A chunk identity seen for the first time in this snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoricalChunk {
    pub chunk_id: ChunkId,
    pub key: ChunkKey,
    pub first_seen: i64,
}

/// Everything one `record` call writes. Computed without touching the index so
/// that a failed commit leaves the in-memory state exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffPlan {
    pub realm: String,
    pub snapshot_ts: i64,
    pub new_chunks: Vec<NewHistoricalChunk>,
    /// `(chunk_id, listing_id)` pairs whose `last_seen` becomes `snapshot_ts`.
    pub sightings: Vec<(ChunkId, ListingId)>,
    /// One event per resolved chunk, in incoming order.
    pub events: Vec<ChunkId>,
    pub continued: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    /// A snapshot for this `(realm, timestamp)` already exists; nothing to do.
    AlreadyRecorded,
    Planned(DiffPlan),
}

/// Where a tracked listing was last filed, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sighting {
    pub chunk_id: ChunkId,
    pub last_seen: i64,
}

#[derive(Debug, Default, Clone)]
pub struct RealmHistory {
    pub snapshots: BTreeSet<i64>,
    /// Which chunk each tracked listing currently belongs to.
    pub listing_chunk: HashMap<ListingId, Sighting>,
}

impl RealmHistory {
    /// File `listing_id` under `chunk_id` as of `seen_at`. An older sighting
    /// never replaces a newer one.
    fn file(&mut self, listing_id: ListingId, chunk_id: ChunkId, seen_at: i64) {
        let sighting = Sighting { chunk_id, last_seen: seen_at };
        self.listing_chunk
            .entry(listing_id)
            .and_modify(|s| {
                if seen_at >= s.last_seen {
                    *s = sighting;
                }
            })
            .or_insert(sighting);
    }
}

/// In-memory view of the historical store: recorded snapshot timestamps and the
/// explicit `listing_id -> chunk_id` mapping used to resolve chunk identity.
#[derive(Debug, Clone)]
pub struct HistoryIndex {
    realms: HashMap<String, RealmHistory>,
    next_chunk_id: ChunkId,
}

impl Default for HistoryIndex {
    fn default() -> Self {
        Self {
            realms: HashMap::new(),
            next_chunk_id: 1,
        }
    }
}

impl HistoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_snapshot(&self, realm: &str, ts: i64) -> bool {
        self.realms
            .get(realm)
            .is_some_and(|h| h.snapshots.contains(&ts))
    }

    #[cfg(test)]
    pub fn chunk_for_listing(&self, realm: &str, listing_id: ListingId) -> Option<ChunkId> {
        self.realms.get(realm)?.listing_chunk.get(&listing_id).map(|s| s.chunk_id)
    }

    pub fn listing_count(&self, realm: &str) -> usize {
        self.realms.get(realm).map_or(0, |h| h.listing_chunk.len())
    }

    #[cfg(test)]
    pub fn snapshot_count(&self, realm: &str) -> usize {
        self.realms.get(realm).map_or(0, |h| h.snapshots.len())
    }

    pub fn next_chunk_id(&self) -> ChunkId {
        self.next_chunk_id
    }

    /// Used when loading from the historical store.
    pub fn insert_snapshot(&mut self, realm: &str, ts: i64) {
        self.realms.entry(realm.to_string()).or_default().snapshots.insert(ts);
    }

    /// Used when loading from the historical store. The most recent sighting
    /// of a listing wins regardless of feed order.
    pub fn insert_sighting(
        &mut self,
        realm: &str,
        listing_id: ListingId,
        chunk_id: ChunkId,
        last_seen: i64,
    ) {
        self.realms
            .entry(realm.to_string())
            .or_default()
            .file(listing_id, chunk_id, last_seen);
        self.bump_next_id(chunk_id);
    }

    /// Forget listings of `realm` not seen since `cutoff`. Their auctions have
    /// expired, so they can no longer carry identity into a new snapshot.
    /// Returns how many were dropped.
    pub fn prune(&mut self, realm: &str, cutoff: i64) -> usize {
        let Some(history) = self.realms.get_mut(realm) else {
            return 0;
        };
        let before = history.listing_chunk.len();
        history.listing_chunk.retain(|_, s| s.last_seen >= cutoff);
        before - history.listing_chunk.len()
    }

    pub fn bump_next_id(&mut self, seen: ChunkId) {
        if seen >= self.next_chunk_id {
            self.next_chunk_id = seen + 1;
        }
    }

    /// Work out what recording `tracked` at `snapshot_ts` would write.
    ///
    /// A chunk continues an existing identity when any of its listings was
    /// previously seen under one; every listing of the chunk is then filed under
    /// that id, including ones never seen before. When a chunk's listings point
    /// at several prior ids the oldest unclaimed one wins. Each prior id can be
    /// continued by at most one incoming chunk per snapshot. Otherwise a new
    /// identity is allocated with `first_seen = snapshot_ts`.
    pub fn plan(
        &self,
        realm: &str,
        snapshot_ts: i64,
        tracked: &[AuctionChunk],
    ) -> std::result::Result<DiffOutcome, DiffConsistencyViolation> {
        if self.has_snapshot(realm, snapshot_ts) {
            return Ok(DiffOutcome::AlreadyRecorded);
        }

        check_listing_uniqueness(realm, tracked)?;

        let history = self.realms.get(realm);
        let mut next_id = self.next_chunk_id;
        let mut claimed: HashSet<ChunkId> = HashSet::new();
        let mut plan = DiffPlan {
            realm: realm.to_string(),
            snapshot_ts,
            new_chunks: Vec::new(),
            sightings: Vec::new(),
            events: Vec::with_capacity(tracked.len()),
            continued: 0,
        };

        for chunk in tracked.iter().filter(|c| c.is_tracked()) {
            let prior: BTreeSet<ChunkId> = history
                .map(|h| {
                    chunk
                        .listing_ids
                        .iter()
                        .filter_map(|id| h.listing_chunk.get(id).map(|s| s.chunk_id))
                        .collect()
                })
                .unwrap_or_default();

            let resolved = match prior.into_iter().find(|id| !claimed.contains(id)) {
                Some(existing) => {
                    plan.continued += 1;
                    existing
                }
                None => {
                    let id = next_id;
                    next_id += 1;
                    plan.new_chunks.push(NewHistoricalChunk {
                        chunk_id: id,
                        key: chunk.key(),
                        first_seen: snapshot_ts,
                    });
                    id
                }
            };

            claimed.insert(resolved);
            plan.sightings
                .extend(chunk.listing_ids.iter().map(|&listing| (resolved, listing)));
            plan.events.push(resolved);
        }

        Ok(DiffOutcome::Planned(plan))
    }

    /// Fold a committed plan into the index.
    pub fn apply(&mut self, plan: &DiffPlan) {
        let history = self.realms.entry(plan.realm.clone()).or_default();
        history.snapshots.insert(plan.snapshot_ts);
        for &(chunk_id, listing_id) in &plan.sightings {
            history.file(listing_id, chunk_id, plan.snapshot_ts);
        }
        let max_new = plan.new_chunks.iter().map(|c| c.chunk_id).max();
        if let Some(id) = max_new {
            self.bump_next_id(id);
        }
    }
}

/// A listing can belong to one chunk per snapshot. Seeing it twice means the
/// clustering step is broken, and recording it would corrupt identity.
fn check_listing_uniqueness(
    realm: &str,
    tracked: &[AuctionChunk],
) -> std::result::Result<(), DiffConsistencyViolation> {
    let mut owner: HashMap<ListingId, ChunkKey> = HashMap::new();
    for chunk in tracked {
        let key = chunk.key();
        for &listing_id in &chunk.listing_ids {
            if let Some(first) = owner.insert(listing_id, key) {
                if first != key {
                    return Err(DiffConsistencyViolation {
                        realm: realm.to_string(),
                        listing_id,
                        first,
                        second: key,
                    });
                }
            }
        }
    }
    Ok(())
}
