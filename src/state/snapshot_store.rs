use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::types::{AuctionChunk, Realm};

// ---------------------------------------------------------------------------
// RealmSnapshot
// ---------------------------------------------------------------------------

/// Latest clustered view of one realm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmSnapshot {
    /// Source version (Unix seconds) the chunks were built from.
    pub version: i64,
    pub chunks: Vec<AuctionChunk>,
    pub tracked_chunks: Vec<AuctionChunk>,
}

impl RealmSnapshot {
    pub fn total_quantity(&self) -> u64 {
        self.chunks.iter().map(|c| u64::from(c.quantity)).sum()
    }
}

// ---------------------------------------------------------------------------
// SnapshotStore
// ---------------------------------------------------------------------------

/// In-memory current state, keyed by realm slug.
///
/// Written only by the coordinator after a realm's round commits; the status
/// server reads it concurrently.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    /// realm slug → latest snapshot
    snapshots: DashMap<String, RealmSnapshot>,
    /// realm slug → schedule clocks as of the last commit
    realms: DashMap<String, Realm>,
}

impl SnapshotStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed from a checkpoint at startup.
    pub fn from_snapshots(snapshots: BTreeMap<String, RealmSnapshot>) -> Arc<Self> {
        let store = Self::default();
        for (slug, snapshot) in snapshots {
            store.snapshots.insert(slug, snapshot);
        }
        Arc::new(store)
    }

    pub fn replace(&self, realm: &str, snapshot: RealmSnapshot) {
        self.snapshots.insert(realm.to_string(), snapshot);
    }

    pub fn get(&self, realm: &str) -> Option<RealmSnapshot> {
        self.snapshots.get(realm).map(|s| s.clone())
    }

    pub fn version(&self, realm: &str) -> Option<i64> {
        self.snapshots.get(realm).map(|s| s.version)
    }

    pub fn chunk_count(&self, realm: &str) -> usize {
        self.snapshots.get(realm).map_or(0, |s| s.chunks.len())
    }

    pub fn realm_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Ordered copy of every snapshot, for the checkpoint blob.
    pub fn export(&self) -> BTreeMap<String, RealmSnapshot> {
        self.snapshots
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn set_realm(&self, realm: &Realm) {
        self.realms.insert(realm.slug.clone(), realm.clone());
    }

    pub fn set_realms(&self, realms: &[Realm]) {
        for realm in realms {
            self.set_realm(realm);
        }
    }

    /// Schedule view of every known realm, sorted by slug.
    pub fn realms(&self) -> Vec<Realm> {
        let mut realms: Vec<Realm> = self.realms.iter().map(|e| e.value().clone()).collect();
        realms.sort_by(|a, b| a.slug.cmp(&b.slug));
        realms
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeLeft;
    use std::collections::HashSet;

    fn snapshot(version: i64, quantities: &[u32]) -> RealmSnapshot {
        RealmSnapshot {
            version,
            chunks: quantities
                .iter()
                .enumerate()
                .map(|(i, &q)| AuctionChunk {
                    item_id: 5,
                    unit_price: 100 + i as u64,
                    stack_size: 1,
                    time_left: TimeLeft::Long,
                    quantity: q,
                    listing_ids: Vec::new(),
                })
                .collect(),
            tracked_chunks: Vec::new(),
        }
    }

    #[test]
    fn replace_overwrites_whole_realm() {
        let store = SnapshotStore::new();
        store.replace("draenor", snapshot(100, &[1, 2, 3]));
        store.replace("draenor", snapshot(200, &[4]));

        let current = store.get("draenor").unwrap();
        assert_eq!(current.version, 200);
        assert_eq!(current.total_quantity(), 4);
        assert_eq!(store.chunk_count("draenor"), 1);
        assert_eq!(store.realm_count(), 1);
    }

    #[test]
    fn export_round_trips_through_seed() {
        let store = SnapshotStore::new();
        store.replace("draenor", snapshot(100, &[1]));
        store.replace("silvermoon", snapshot(150, &[2, 2]));

        let seeded = SnapshotStore::from_snapshots(store.export());
        assert_eq!(seeded.version("silvermoon"), Some(150));
        assert_eq!(seeded.chunk_count("silvermoon"), 2);
        assert!(seeded.get("kazzak").is_none());
    }

    #[test]
    fn realms_are_listed_by_slug() {
        let store = SnapshotStore::new();
        let realm = |slug: &str| Realm {
            name: slug.to_string(),
            slug: slug.to_string(),
            update_interval: 3600,
            last_update: 0,
            last_check: 0,
            json_link: None,
            tracked_sellers: HashSet::new(),
        };
        store.set_realms(&[realm("silvermoon"), realm("draenor")]);
        let slugs: Vec<String> = store.realms().into_iter().map(|r| r.slug).collect();
        assert_eq!(slugs, vec!["draenor", "silvermoon"]);
    }
}
