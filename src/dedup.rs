//! Repeat suppression for alert items.
//!
//! Each watch owns one cache. A snapshot of the tracked attributes is kept
//! per key; an item is forwarded only when its key is unseen or its snapshot
//! differs from the stored one. The scheduler clears caches at the top of
//! each hour so alerts re-fire for conditions that persist.

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::model::{AlertItem, DedupKey};

#[derive(Debug, Default)]
pub struct DedupCache {
    records: HashMap<DedupKey, Value>,
    suppress_repeats: bool,
}

impl DedupCache {
    pub fn new(suppress_repeats: bool) -> Self {
        Self {
            records: HashMap::new(),
            suppress_repeats,
        }
    }

    /// Keep the items that should fire and record their snapshots. With
    /// suppression disabled this is the identity function and the cache
    /// stays untouched.
    pub fn filter(&mut self, items: Vec<AlertItem>) -> Vec<AlertItem> {
        if !self.suppress_repeats {
            return items;
        }
        let mut fresh = Vec::with_capacity(items.len());
        for item in items {
            match self.records.get(&item.key) {
                Some(prev) if *prev == item.attrs => {
                    debug!(key = %item.key, "exact match, suppressed");
                }
                Some(_) => {
                    debug!(key = %item.key, "tracked attributes changed");
                    self.records.insert(item.key.clone(), item.attrs.clone());
                    fresh.push(item);
                }
                None => {
                    debug!(key = %item.key, "first occurrence");
                    self.records.insert(item.key.clone(), item.attrs.clone());
                    fresh.push(item);
                }
            }
        }
        fresh
    }

    /// Drop every snapshot. The next pass treats all matches as first
    /// occurrences.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FormattedEntry;
    use serde_json::json;

    fn item(key: &str, attrs: Value) -> AlertItem {
        AlertItem {
            key: DedupKey::new(key),
            attrs,
            entry: FormattedEntry::plain(key),
        }
    }

    fn keys(items: &[AlertItem]) -> Vec<String> {
        items.iter().map(|i| i.key.to_string()).collect()
    }

    #[test]
    fn first_occurrence_passes_and_is_recorded() {
        let mut cache = DedupCache::new(true);
        let out = cache.filter(vec![item("a", json!({"price": 100}))]);
        assert_eq!(keys(&out), ["a"]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn identical_snapshot_is_suppressed() {
        let mut cache = DedupCache::new(true);
        cache.filter(vec![item("a", json!({"price": 100}))]);
        let out = cache.filter(vec![item("a", json!({"price": 100}))]);
        assert!(out.is_empty());
    }

    #[test]
    fn changed_attribute_fires_again() {
        let mut cache = DedupCache::new(true);
        cache.filter(vec![item("a", json!({"price": 100}))]);
        let out = cache.filter(vec![item("a", json!({"price": 95}))]);
        assert_eq!(keys(&out), ["a"]);

        // The new snapshot replaced the old one.
        let out = cache.filter(vec![item("a", json!({"price": 95}))]);
        assert!(out.is_empty());
    }

    #[test]
    fn clear_resets_first_occurrence_semantics() {
        let mut cache = DedupCache::new(true);
        cache.filter(vec![item("a", json!({"price": 100}))]);
        cache.clear();
        assert!(cache.is_empty());
        let out = cache.filter(vec![item("a", json!({"price": 100}))]);
        assert_eq!(keys(&out), ["a"]);
    }

    #[test]
    fn disabled_suppression_is_identity_and_stateless() {
        let mut cache = DedupCache::new(false);
        let batch = vec![item("a", json!({"price": 100})), item("a", json!({"price": 100}))];
        let out = cache.filter(batch);
        assert_eq!(keys(&out), ["a", "a"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn mixed_batch_keeps_only_fresh_items() {
        let mut cache = DedupCache::new(true);
        cache.filter(vec![item("a", json!(1)), item("b", json!(2))]);
        let out = cache.filter(vec![
            item("a", json!(1)),
            item("b", json!(3)),
            item("c", json!(4)),
        ]);
        assert_eq!(keys(&out), ["b", "c"]);
    }
}
