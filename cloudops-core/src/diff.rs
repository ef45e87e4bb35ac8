//! Minimal-diff computation between observed and declared collections.
//!
//! Only keys present in either input are ever referenced, so a caller that
//! owns one subset of an aggregate never produces changes to another.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Difference between two maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapDiff<K: Eq + Hash, V> {
    /// Keys in desired, not in existing.
    pub added: HashMap<K, V>,
    /// Keys in existing, not in desired (with their existing values).
    pub removed: HashMap<K, V>,
    /// Keys in both whose value changed (with their desired values).
    pub modified: HashMap<K, V>,
}

impl<K, V> MapDiff<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// `added` and `modified` merged, for APIs that overwrite on conflict.
    pub fn upserts(&self) -> HashMap<K, V> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn removed_keys(&self) -> Vec<K> {
        self.removed.keys().cloned().collect()
    }

    /// Apply this diff to `existing`, as the server would.
    pub fn apply(&self, existing: &HashMap<K, V>) -> HashMap<K, V> {
        let mut result = existing.clone();
        for key in self.removed.keys() {
            result.remove(key);
        }
        result.extend(self.upserts());
        result
    }
}

/// Compute the difference between `existing` and `desired`.
pub fn diff_map<K, V>(existing: &HashMap<K, V>, desired: &HashMap<K, V>) -> MapDiff<K, V>
where
    K: Eq + Hash + Clone,
    V: PartialEq + Clone,
{
    let mut added = HashMap::new();
    let mut modified = HashMap::new();

    for (key, value) in desired {
        match existing.get(key) {
            None => {
                added.insert(key.clone(), value.clone());
            }
            Some(current) if current != value => {
                modified.insert(key.clone(), value.clone());
            }
            Some(_) => {}
        }
    }

    let removed = existing
        .iter()
        .filter(|(key, _)| !desired.contains_key(*key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    MapDiff {
        added,
        removed,
        modified,
    }
}

/// Difference between two sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<T: Eq + Hash> {
    pub added: HashSet<T>,
    pub removed: HashSet<T>,
}

impl<T: Eq + Hash + Clone> SetDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn apply(&self, existing: &HashSet<T>) -> HashSet<T> {
        existing
            .difference(&self.removed)
            .chain(self.added.iter())
            .cloned()
            .collect()
    }
}

pub fn diff_set<T>(existing: &HashSet<T>, desired: &HashSet<T>) -> SetDiff<T>
where
    T: Eq + Hash + Clone,
{
    SetDiff {
        added: desired.difference(existing).cloned().collect(),
        removed: existing.difference(desired).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, i32)]) -> HashMap<String, i32> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn set(entries: &[&str]) -> HashSet<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_map_classifies_each_key() {
        let diff = diff_map(&map(&[("a", 1), ("b", 2)]), &map(&[("b", 3), ("c", 4)]));

        assert_eq!(diff.added, map(&[("c", 4)]));
        assert_eq!(diff.removed, map(&[("a", 1)]));
        assert_eq!(diff.modified, map(&[("b", 3)]));
        assert_eq!(diff.upserts(), map(&[("b", 3), ("c", 4)]));
        assert_eq!(diff.removed_keys(), vec!["a".to_string()]);
    }

    #[test]
    fn test_diff_map_second_pass_is_empty() {
        let cases = [
            (map(&[]), map(&[("a", 1)])),
            (map(&[("a", 1)]), map(&[])),
            (map(&[("a", 1), ("b", 2)]), map(&[("b", 3), ("c", 4)])),
            (map(&[("x", 7)]), map(&[("x", 7)])),
        ];

        for (existing, desired) in cases {
            let first = diff_map(&existing, &desired);
            let applied = first.apply(&existing);
            assert_eq!(applied, desired);
            assert!(diff_map(&applied, &desired).is_empty());
        }
    }

    #[test]
    fn test_diff_map_unchanged_values_are_not_modified() {
        let diff = diff_map(&map(&[("a", 1), ("b", 2)]), &map(&[("a", 1), ("b", 2)]));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_diff_map_compares_values_deeply() {
        let existing: HashMap<&str, Vec<&str>> = HashMap::from([("ns", vec!["read", "write"])]);
        let desired: HashMap<&str, Vec<&str>> = HashMap::from([("ns", vec!["read", "write"])]);
        assert!(diff_map(&existing, &desired).is_empty());

        let desired: HashMap<&str, Vec<&str>> = HashMap::from([("ns", vec!["read"])]);
        assert_eq!(diff_map(&existing, &desired).modified.len(), 1);
    }

    #[test]
    fn test_diff_set() {
        let diff = diff_set(&set(&["u1", "u2"]), &set(&["u2", "u3"]));

        assert_eq!(diff.added, set(&["u3"]));
        assert_eq!(diff.removed, set(&["u1"]));
        assert_eq!(diff.apply(&set(&["u1", "u2"])), set(&["u2", "u3"]));
    }

    #[test]
    fn test_diff_set_identical_is_empty() {
        assert!(diff_set(&set(&["u1"]), &set(&["u1"])).is_empty());
    }
}
