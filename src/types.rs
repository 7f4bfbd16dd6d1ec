use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::COPPER_PER_GOLD;

pub type ListingId = u64;
pub type ChunkId = i64;

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realm {
    pub name: String,
    pub slug: String,
    /// Expected publishing cadence of the source for this realm (seconds).
    pub update_interval: u64,
    /// Unix seconds of the last source-reported data version we committed.
    pub last_update: i64,
    /// Unix seconds of the last probe attempt.
    pub last_check: i64,
    /// Dump URL reported by the last probe.
    pub json_link: Option<String>,
    /// Owners whose listings keep their individual identity.
    pub tracked_sellers: HashSet<String>,
}

impl Realm {
    /// When the source is expected to publish the next version.
    pub fn expected_update_at(&self) -> i64 {
        self.last_update.saturating_add(self.update_interval as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub item_id: u32,
    pub name: String,
    pub valid_stack_sizes: BTreeSet<u32>,
}

// ---------------------------------------------------------------------------
// Raw source data
// ---------------------------------------------------------------------------

/// Coarse remaining-time bucket as reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeLeft {
    Short,
    Medium,
    Long,
    VeryLong,
}

impl TimeLeft {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeLeft::Short => "SHORT",
            TimeLeft::Medium => "MEDIUM",
            TimeLeft::Long => "LONG",
            TimeLeft::VeryLong => "VERY_LONG",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SHORT" => Some(TimeLeft::Short),
            "MEDIUM" => Some(TimeLeft::Medium),
            "LONG" => Some(TimeLeft::Long),
            "VERY_LONG" => Some(TimeLeft::VeryLong),
            _ => None,
        }
    }
}

impl std::fmt::Display for TimeLeft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawListing {
    pub listing_id: ListingId,
    pub item_id: u32,
    pub owner: String,
    /// Total buyout in copper.
    pub buyout_total: u64,
    pub stack_size: u32,
    pub time_left: TimeLeft,
}

/// Source-reported data version for one realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceVersion {
    /// Last-modified time coarsened to whole Unix seconds.
    pub last_modified: i64,
    pub dump_url: String,
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// Per-unit price in copper: `round(buyout_total / stack_size)`, half up.
/// A zero stack size never reaches here; decoding rejects it.
pub fn unit_price(buyout_total: u64, stack_size: u32) -> u64 {
    let stack = u128::from(stack_size.max(1));
    let rounded = (u128::from(buyout_total) + stack / 2) / stack;
    u64::try_from(rounded).unwrap_or(u64::MAX)
}

/// Clustering key. Two listings with the same key always land in the same chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub item_id: u32,
    /// Copper per unit.
    pub unit_price: u64,
    pub stack_size: u32,
    pub time_left: TimeLeft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionChunk {
    pub item_id: u32,
    /// Copper per unit.
    pub unit_price: u64,
    pub stack_size: u32,
    pub time_left: TimeLeft,
    /// Number of raw listings sharing the key.
    pub quantity: u32,
    /// Listing ids owned by tracked sellers, ascending. Empty for untracked chunks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listing_ids: Vec<ListingId>,
}

impl AuctionChunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey {
            item_id: self.item_id,
            unit_price: self.unit_price,
            stack_size: self.stack_size,
            time_left: self.time_left,
        }
    }

    /// Unit price in gold.
    pub fn unit_price_major(&self) -> f64 {
        self.unit_price as f64 / COPPER_PER_GOLD as f64
    }

    pub fn is_tracked(&self) -> bool {
        !self.listing_ids.is_empty()
    }
}
