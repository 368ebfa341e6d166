// ── Per-resource TTL cache ──
//
// Holds the last known snapshot of every resource. Pure in-memory state:
// never performs I/O, never evicts except by overwrite.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{ResourceKey, Snapshot};

/// A cached snapshot together with the window it stays fresh for.
pub struct CacheEntry<T> {
    pub key: ResourceKey,
    pub snapshot: Snapshot<T>,
    pub max_age: Duration,
}

impl<T> CacheEntry<T> {
    /// Fresh iff `now - snapshot.fetched_at < max_age`. A stale entry is
    /// still servable while a refresh runs.
    pub fn is_fresh(&self) -> bool {
        self.snapshot.is_fresh(self.max_age)
    }
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            snapshot: self.snapshot.clone(),
            max_age: self.max_age,
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CacheEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("snapshot", &self.snapshot)
            .field("max_age", &self.max_age)
            .finish()
    }
}

/// Last known snapshot per resource key.
///
/// Created once at application start and injected into the
/// [`FetchCoordinator`](super::FetchCoordinator); entries live for the
/// process lifetime. Every `put` is also published to the key's
/// [`subscribe`](Self::subscribe) receivers, so all views of a resource see
/// the winning snapshot no matter which of them asked for it.
pub struct ResponseCache<T> {
    entries: DashMap<ResourceKey, CacheEntry<T>>,
    updates: DashMap<ResourceKey, watch::Sender<Option<Snapshot<T>>>>,
}

impl<T> Default for ResponseCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResponseCache<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            updates: DashMap::new(),
        }
    }

    /// Look up an entry (cheap: the payload is behind an `Arc`).
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Store `snapshot` as the latest state of `key`, replacing any entry.
    pub fn put(&self, key: ResourceKey, snapshot: Snapshot<T>, max_age: Duration) {
        let entry = CacheEntry {
            key: key.clone(),
            snapshot,
            max_age,
        };
        let published = entry.snapshot.clone();
        self.entries.insert(key.clone(), entry);
        self.updates
            .entry(key)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(published));
    }

    /// Follow every future `put` for `key`. The current entry, if any, is
    /// the receiver's initial value and counts as already seen.
    pub fn subscribe(&self, key: &ResourceKey) -> watch::Receiver<Option<Snapshot<T>>> {
        self.updates
            .entry(key.clone())
            .or_insert_with(|| watch::channel(self.get(key.as_str()).map(|e| e.snapshot)).0)
            .subscribe()
    }

    pub fn is_fresh(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| e.is_fresh())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }
}
