use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::PersistenceError;
use crate::state::RealmSnapshot;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointBlob {
    saved_at: u64,
    snapshots: BTreeMap<String, RealmSnapshot>,
}

/// On-disk copy of the in-memory snapshot state, rewritten after every merge.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the last checkpoint. A missing or unreadable file is not an error:
    /// the process starts from empty state.
    pub async fn load(&self) -> BTreeMap<String, RealmSnapshot> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No checkpoint found, starting empty");
                return BTreeMap::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Checkpoint unreadable, starting empty: {e}");
                return BTreeMap::new();
            }
        };

        match serde_json::from_slice::<CheckpointBlob>(&bytes) {
            Ok(blob) => {
                info!(
                    path = %self.path.display(),
                    realms = blob.snapshots.len(),
                    saved_at = blob.saved_at,
                    "Checkpoint loaded"
                );
                blob.snapshots
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Checkpoint corrupt, starting empty: {e}");
                BTreeMap::new()
            }
        }
    }

    /// Overwrite the checkpoint. Written to a sibling temp file and renamed into
    /// place so a crash mid-write never leaves a truncated blob.
    pub async fn save(
        &self,
        snapshots: BTreeMap<String, RealmSnapshot>,
    ) -> std::result::Result<(), PersistenceError> {
        let blob = CheckpointBlob {
            saved_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            snapshots,
        };
        let bytes =
            serde_json::to_vec(&blob).map_err(|e| PersistenceError::Checkpoint(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| PersistenceError::Checkpoint(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| PersistenceError::Checkpoint(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuctionChunk, TimeLeft};

    fn snapshots() -> BTreeMap<String, RealmSnapshot> {
        let chunk = AuctionChunk {
            item_id: 5,
            unit_price: 600,
            stack_size: 20,
            time_left: TimeLeft::Short,
            quantity: 2,
            listing_ids: vec![11],
        };
        BTreeMap::from([(
            "draenor".to_string(),
            RealmSnapshot {
                version: 1_700_000_000,
                chunks: vec![chunk.clone()],
                tracked_chunks: vec![chunk],
            },
        )])
    }

    #[tokio::test]
    async fn save_then_load_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("state.json"));

        checkpoint.save(snapshots()).await.unwrap();
        assert_eq!(checkpoint.load().await, snapshots());
        assert!(!dir.path().join("state.tmp").exists());
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("absent.json"));
        assert!(checkpoint.load().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(Checkpoint::new(path).load().await.is_empty());
    }

    #[tokio::test]
    async fn unwritable_location_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("missing-dir").join("state.json"));
        let err = checkpoint.save(snapshots()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Checkpoint(_)));
    }
}
