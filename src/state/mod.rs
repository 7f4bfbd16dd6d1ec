pub mod checkpoint;
pub mod snapshot_store;

pub use checkpoint::Checkpoint;
pub use snapshot_store::{RealmSnapshot, SnapshotStore};
