use crate::types::Item;

/// Which stack sizes of an item are worth clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPolicy {
    /// Only the sizes listed in the item's `valid_stack_sizes`.
    ItemSizes,
    /// Any stack at or above the floor, regardless of the item's list.
    AtLeast(u32),
}

impl StackPolicy {
    pub fn from_floor(min_stack_size: Option<u32>) -> Self {
        match min_stack_size {
            Some(floor) => StackPolicy::AtLeast(floor),
            None => StackPolicy::ItemSizes,
        }
    }

    pub fn accepts(&self, item: &Item, stack_size: u32) -> bool {
        match self {
            StackPolicy::ItemSizes => item.valid_stack_sizes.contains(&stack_size),
            StackPolicy::AtLeast(floor) => stack_size >= *floor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn herb() -> Item {
        Item {
            item_id: 168487,
            name: "Zin'anthid".to_string(),
            valid_stack_sizes: BTreeSet::from([1, 5, 20]),
        }
    }

    #[test]
    fn item_sizes_policy_uses_explicit_list() {
        let policy = StackPolicy::from_floor(None);
        assert!(policy.accepts(&herb(), 20));
        assert!(!policy.accepts(&herb(), 19));
        assert!(!policy.accepts(&herb(), 200));
    }

    #[test]
    fn floor_policy_ignores_item_list() {
        let policy = StackPolicy::from_floor(Some(10));
        assert!(policy.accepts(&herb(), 10));
        assert!(policy.accepts(&herb(), 19));
        assert!(!policy.accepts(&herb(), 5));
    }
}
