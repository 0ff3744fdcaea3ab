//! Group weight ordering.

use std::cmp::Ordering;

/// Compare two group weights, ascending.
///
/// Equal weights compare as `Greater` in both directions, never `Equal`.
/// Existing deployments rely on the resulting tie order, so the comparator is
/// kept as is. It is not a total order and must not be passed to
/// `slice::sort_by`; use [`WeightedGroups`] instead.
#[must_use]
pub fn compare_weight(a: i32, b: i32) -> Ordering {
    match a.cmp(&b) {
        Ordering::Equal => Ordering::Greater,
        other => other,
    }
}

/// Groups ordered by [`compare_weight`], the way an ordered tree map would
/// hold them: a newcomer goes after every entry it compares greater than.
///
/// Ties therefore keep insertion order ascending, and precedence order
/// (reverse) puts the later-inserted of two equal-weight groups first.
#[derive(Debug, Clone)]
pub struct WeightedGroups<T> {
    entries: Vec<(i32, T)>,
}

impl<T> WeightedGroups<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, weight: i32, item: T) {
        let index = self
            .entries
            .partition_point(|(existing, _)| compare_weight(weight, *existing) == Ordering::Greater);
        self.entries.insert(index, (weight, item));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest weight first
    pub fn iter_by_precedence(&self) -> impl Iterator<Item = (i32, &T)> {
        self.entries.iter().rev().map(|(weight, item)| (*weight, item))
    }

    /// Consume into precedence order, highest weight first
    #[must_use]
    pub fn into_precedence_order(self) -> Vec<T> {
        self.entries.into_iter().rev().map(|(_, item)| item).collect()
    }
}

impl<T> Default for WeightedGroups<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_ascending() {
        assert_eq!(compare_weight(10, 20), Ordering::Less);
        assert_eq!(compare_weight(20, 10), Ordering::Greater);
    }

    #[test]
    fn test_ties_compare_greater_both_ways() {
        assert_eq!(compare_weight(5, 5), Ordering::Greater);
        assert_eq!(compare_weight(5, 5), compare_weight(5, 5));
        assert_ne!(compare_weight(0, 0), Ordering::Equal);
    }

    #[test]
    fn test_precedence_highest_first() {
        let mut groups = WeightedGroups::new();
        groups.insert(10, "g1");
        groups.insert(20, "g2");
        groups.insert(15, "g3");

        assert_eq!(groups.into_precedence_order(), vec!["g2", "g3", "g1"]);
    }

    #[test]
    fn test_equal_weights_later_insert_first() {
        let mut groups = WeightedGroups::new();
        groups.insert(0, "first");
        groups.insert(0, "second");
        groups.insert(0, "third");
        groups.insert(-1, "low");

        let order: Vec<_> = groups.iter_by_precedence().map(|(_, g)| *g).collect();
        assert_eq!(order, vec!["third", "second", "first", "low"]);
    }
}
