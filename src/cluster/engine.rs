use std::collections::{BTreeMap, HashMap, HashSet};

use crate::cluster::StackPolicy;
use crate::types::{unit_price, AuctionChunk, ChunkKey, Item, ListingId, RawListing};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClusterStats {
    pub listings_in: usize,
    pub eligible: usize,
    /// Listings for items the catalog does not know about.
    pub rejected_unknown_item: usize,
    pub rejected_stack_size: usize,
    pub chunks: usize,
    pub tracked_chunks: usize,
}

#[derive(Debug, Default, Clone)]
pub struct ClusterOutput {
    /// Every chunk, ordered by item then ascending unit price.
    pub chunks: Vec<AuctionChunk>,
    /// The subset of `chunks` with at least one tracked listing.
    pub tracked: Vec<AuctionChunk>,
    pub stats: ClusterStats,
}

#[derive(Default)]
struct Group {
    quantity: u32,
    tracked_ids: Vec<ListingId>,
}

/// Reduce one realm's raw dump to aggregated chunks.
///
/// Listings are grouped by `(item_id, unit_price, stack_size, time_left)`; each
/// group becomes one chunk whose `quantity` is the group size. Listings owned by
/// a tracked seller keep their ids on the chunk, which is what makes the chunk
/// eligible for historical diffing. Items with no eligible listings produce
/// nothing.
pub fn cluster(
    raw: &[RawListing],
    items: &HashMap<u32, Item>,
    tracked_sellers: &HashSet<String>,
    policy: StackPolicy,
) -> ClusterOutput {
    let mut stats = ClusterStats {
        listings_in: raw.len(),
        ..ClusterStats::default()
    };

    // BTreeMap keeps emission ordered by ChunkKey: item first, then unit price.
    let mut groups: BTreeMap<ChunkKey, Group> = BTreeMap::new();

    for listing in raw {
        let Some(item) = items.get(&listing.item_id) else {
            stats.rejected_unknown_item += 1;
            continue;
        };
        if !policy.accepts(item, listing.stack_size) {
            stats.rejected_stack_size += 1;
            continue;
        }
        stats.eligible += 1;

        let key = ChunkKey {
            item_id: listing.item_id,
            unit_price: unit_price(listing.buyout_total, listing.stack_size),
            stack_size: listing.stack_size,
            time_left: listing.time_left,
        };
        let group = groups.entry(key).or_default();
        group.quantity += 1;
        if tracked_sellers.contains(&listing.owner) {
            group.tracked_ids.push(listing.listing_id);
        }
    }

    let mut chunks = Vec::with_capacity(groups.len());
    let mut tracked = Vec::new();

    for (key, mut group) in groups {
        group.tracked_ids.sort_unstable();
        group.tracked_ids.dedup();

        let chunk = AuctionChunk {
            item_id: key.item_id,
            unit_price: key.unit_price,
            stack_size: key.stack_size,
            time_left: key.time_left,
            quantity: group.quantity,
            listing_ids: group.tracked_ids,
        };
        if chunk.is_tracked() {
            tracked.push(chunk.clone());
        }
        chunks.push(chunk);
    }

    stats.chunks = chunks.len();
    stats.tracked_chunks = tracked.len();

    ClusterOutput { chunks, tracked, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeLeft;
    use std::collections::BTreeSet;

    fn items() -> HashMap<u32, Item> {
        let mut m = HashMap::new();
        m.insert(
            5,
            Item {
                item_id: 5,
                name: "Linen Cloth".to_string(),
                valid_stack_sizes: BTreeSet::from([1, 10, 20]),
            },
        );
        m.insert(
            7,
            Item {
                item_id: 7,
                name: "Copper Ore".to_string(),
                valid_stack_sizes: BTreeSet::from([20]),
            },
        );
        m
    }

    fn listing(id: u64, item_id: u32, owner: &str, buyout: u64, stack: u32, tl: TimeLeft) -> RawListing {
        RawListing {
            listing_id: id,
            item_id,
            owner: owner.to_string(),
            buyout_total: buyout,
            stack_size: stack,
            time_left: tl,
        }
    }

    fn sellers(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_keys_collapse_into_one_chunk() {
        let raw = vec![
            listing(1, 5, "x", 1000, 10, TimeLeft::Long),
            listing(2, 5, "y", 1000, 10, TimeLeft::Long),
            listing(3, 5, "z", 1000, 10, TimeLeft::Long),
        ];
        let out = cluster(&raw, &items(), &HashSet::new(), StackPolicy::ItemSizes);
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].quantity, 3);
        assert!(out.tracked.is_empty());
    }

    #[test]
    fn tracked_seller_provenance_is_kept() {
        let raw = vec![
            listing(101, 5, "A", 1000, 10, TimeLeft::Short),
            listing(202, 5, "B", 1000, 10, TimeLeft::Short),
        ];
        let out = cluster(&raw, &items(), &sellers(&["A"]), StackPolicy::ItemSizes);

        assert_eq!(out.chunks.len(), 1);
        let chunk = &out.chunks[0];
        assert_eq!(chunk.item_id, 5);
        assert_eq!(chunk.unit_price, 100);
        assert_eq!(chunk.stack_size, 10);
        assert_eq!(chunk.time_left, TimeLeft::Short);
        assert_eq!(chunk.quantity, 2);
        assert_eq!(chunk.listing_ids, vec![101]);
        assert_eq!(out.tracked, vec![chunk.clone()]);
    }

    #[test]
    fn time_left_and_stack_split_chunks() {
        let raw = vec![
            listing(1, 5, "x", 1000, 10, TimeLeft::Short),
            listing(2, 5, "x", 1000, 10, TimeLeft::Long),
            listing(3, 5, "x", 2000, 20, TimeLeft::Short),
        ];
        let out = cluster(&raw, &items(), &HashSet::new(), StackPolicy::ItemSizes);
        // Same unit price (100) but different bucket or stack size.
        assert_eq!(out.chunks.len(), 3);
        assert!(out.chunks.iter().all(|c| c.quantity == 1 && c.unit_price == 100));
    }

    #[test]
    fn ineligible_and_unknown_listings_are_dropped() {
        let raw = vec![
            listing(1, 5, "x", 1500, 15, TimeLeft::Long), // 15 not a valid size
            listing(2, 99, "x", 100, 1, TimeLeft::Long),  // unknown item
            listing(3, 7, "x", 100, 5, TimeLeft::Long),   // only 20s for item 7
        ];
        let out = cluster(&raw, &items(), &HashSet::new(), StackPolicy::ItemSizes);
        assert!(out.chunks.is_empty(), "items with no eligible listings emit nothing");
        assert_eq!(out.stats.rejected_stack_size, 2);
        assert_eq!(out.stats.rejected_unknown_item, 1);
        assert_eq!(out.stats.eligible, 0);
    }

    #[test]
    fn floor_policy_admits_unlisted_sizes() {
        let raw = vec![listing(1, 5, "x", 1500, 15, TimeLeft::Long)];
        let out = cluster(&raw, &items(), &HashSet::new(), StackPolicy::AtLeast(10));
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].unit_price, 100);
    }

    #[test]
    fn chunks_ascend_by_unit_price_within_item() {
        let raw = vec![
            listing(1, 5, "x", 3000, 10, TimeLeft::Long),
            listing(2, 5, "x", 1000, 10, TimeLeft::Long),
            listing(3, 5, "x", 2000, 10, TimeLeft::Long),
        ];
        let out = cluster(&raw, &items(), &HashSet::new(), StackPolicy::ItemSizes);
        let prices: Vec<u64> = out.chunks.iter().map(|c| c.unit_price).collect();
        assert_eq!(prices, vec![100, 200, 300]);
    }

    #[test]
    fn tracked_ids_are_sorted_and_unique() {
        let raw = vec![
            listing(9, 7, "A", 2000, 20, TimeLeft::Medium),
            listing(3, 7, "A", 2000, 20, TimeLeft::Medium),
            listing(3, 7, "A", 2000, 20, TimeLeft::Medium),
        ];
        let out = cluster(&raw, &items(), &sellers(&["A"]), StackPolicy::ItemSizes);
        assert_eq!(out.tracked.len(), 1);
        assert_eq!(out.tracked[0].listing_ids, vec![3, 9]);
    }
}
