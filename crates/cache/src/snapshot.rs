//! Published cache state.

use crate::fingerprint::Fingerprint;
use crate::loader::Records;
use std::sync::Arc;
use time::UtcDateTime;
use tokio::sync::RwLock;

/// An immutable key → records mapping, together with the fingerprint of the
/// data it was built from.
///
/// A snapshot is always the complete result of one load; it is never patched.
/// Newer data arrives as a whole new snapshot.
#[derive(Debug)]
pub struct Snapshot<R> {
    records: Records<R>,
    fingerprint: Fingerprint,
    loaded_at: UtcDateTime,
    len: usize,
}

impl<R> Snapshot<R> {
    pub(crate) fn new(records: Records<R>, fingerprint: Fingerprint) -> Self {
        let len = records.values().map(Vec::len).sum();
        Self {
            records,
            fingerprint,
            loaded_at: UtcDateTime::now(),
            len,
        }
    }

    /// Records sharing `key`, in result-row order. Empty if the key is unknown.
    pub fn get(&self, key: &str) -> &[R] {
        self.records.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// All keys, in unspecified order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// All records, grouped by key, keys in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.values().flatten()
    }

    /// Total number of records across all keys.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn key_count(&self) -> usize {
        self.records.len()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn loaded_at(&self) -> UtcDateTime {
        self.loaded_at
    }
}

/// Holder of the current snapshot.
///
/// One reader/writer lock guards the (records, fingerprint) pair as a unit.
/// Readers only hold the shared lock long enough to clone an [`Arc`]; the
/// writer only holds the exclusive lock long enough to swap it.
pub(crate) struct Store<R> {
    current: RwLock<Arc<Snapshot<R>>>,
}

impl<R> Store<R> {
    pub(crate) fn new(snapshot: Snapshot<R>) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub(crate) async fn current(&self) -> Arc<Snapshot<R>> {
        self.current.read().await.clone()
    }

    /// Replace the current snapshot, returning the previous one.
    pub(crate) async fn publish(&self, snapshot: Snapshot<R>) -> Arc<Snapshot<R>> {
        let snapshot = Arc::new(snapshot);
        std::mem::replace(&mut *self.current.write().await, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot(entries: &[(&str, &[i32])], fingerprint: &str) -> Snapshot<i32> {
        let records: HashMap<String, Vec<i32>> =
            entries.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect();
        Snapshot::new(records, Fingerprint::from(fingerprint.to_string()))
    }

    #[test]
    fn test_get() {
        let loaded = snapshot(&[("A", &[1, 2]), ("B", &[3])], "3|0");
        assert_eq!(loaded.get("A"), &[1, 2]);
        assert_eq!(loaded.get("B"), &[3]);
        assert!(loaded.get("C").is_empty());
        assert!(loaded.contains_key("A"));
        assert!(!loaded.contains_key("C"));
    }

    #[test]
    fn test_counts() {
        let loaded = snapshot(&[("A", &[1, 2]), ("B", &[3])], "3|0");
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.key_count(), 2);
        let mut all: Vec<i32> = loaded.iter().copied().collect();
        all.sort();
        assert_eq!(all, vec![1, 2, 3]);
        assert!(snapshot(&[], "0|0").is_empty());
    }

    #[tokio::test]
    async fn test_publish_swaps_whole_snapshot() {
        let store = Store::new(snapshot(&[("A", &[1])], "1|0"));
        let held = store.current().await;
        let previous = store.publish(snapshot(&[("B", &[2])], "1|1")).await;
        // Readers holding the old snapshot keep seeing it, unchanged.
        assert_eq!(held.get("A"), &[1]);
        assert!(Arc::ptr_eq(&held, &previous));
        let current = store.current().await;
        assert_eq!(current.fingerprint().as_str(), "1|1");
        assert!(current.get("A").is_empty());
        assert_eq!(current.get("B"), &[2]);
    }
}
