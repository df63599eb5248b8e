//! Result Cache & Named Results (spec §3, §5)
//!
//! [`QueryResultCache`] is the LRU cache keyed by sub-tree fingerprint
//! (every expression/operator exposes a `cache_key`); [`NamedResultCache`]
//! holds results pinned under a user-chosen name via
//! `queryAndPinResultWithName`, never evicted except by explicit removal.
//!
//! Grounded on the teacher's `protocol::rest` rate limiter
//! (`Arc<DashMap<K, V>>` as the thread-safe map shape) for the pinned
//! store, and on the wider example pack's use of an `lru`-family crate for
//! recency-ordered eviction — the teacher itself has no LRU cache, so this
//! is the one new dependency this module pulls in (see `DESIGN.md`).

use crate::row::IdTable;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Tuning knobs mirroring spec §6's `cache-max-num-entries` /
/// `cache-max-size-gb` / `cache-max-size-gb-single-entry` parameters.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub max_num_entries: usize,
    pub max_total_bytes: u64,
    pub max_single_entry_bytes: u64,
}

impl CacheConfig {
    pub fn new(max_num_entries: usize, max_total_bytes: u64, max_single_entry_bytes: u64) -> CacheConfig {
        CacheConfig {
            max_num_entries,
            max_total_bytes,
            max_single_entry_bytes,
        }
    }
}

struct Entry {
    table: Arc<IdTable>,
    byte_size: u64,
}

/// Thread-safe LRU cache of intermediate result tables, keyed by the
/// producing sub-tree's cache-key string (spec §4.4: "Every expression
/// exposes `cacheKey`"). One shared lock guards both the LRU order and the
/// running byte total, matching spec §5's "synchronized behind internal
/// locks" rather than a lock-free map — eviction needs a consistent view of
/// both at once.
pub struct QueryResultCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: LruCache<String, Entry>,
    total_bytes: u64,
}

impl QueryResultCache {
    pub fn new(config: CacheConfig) -> QueryResultCache {
        let capacity = NonZeroUsize::new(config.max_num_entries.max(1)).unwrap();
        QueryResultCache {
            config,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                total_bytes: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<IdTable>> {
        let mut inner = self.inner.lock();
        inner.entries.get(key).map(|e| Arc::clone(&e.table))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Insert a result, evicting least-recently-used entries until the
    /// configured byte budget is respected. Entries larger than
    /// `max_single_entry_bytes` are silently not cached (spec §6's
    /// single-entry cap), matching the "not every producible result is
    /// worth caching" behavior of the reference cache.
    pub fn insert(&self, key: String, table: Arc<IdTable>) {
        let byte_size = table.byte_size();
        if byte_size > self.config.max_single_entry_bytes {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.put(key, Entry { table, byte_size }) {
            inner.total_bytes -= old.byte_size;
        }
        inner.total_bytes += byte_size;
        while inner.total_bytes > self.config.max_total_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => inner.total_bytes -= evicted.byte_size,
                None => break,
            }
        }
    }

    /// The "clear-on-allocation" eviction hook (spec §5): drop everything,
    /// invoked once by the memory accountant before it gives up on an
    /// allocation request.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_size_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }
}

/// Results pinned under a user-chosen name via
/// `queryAndPinResultWithName` (spec §6). Never evicted by memory
/// pressure; only explicit `remove` clears an entry.
#[derive(Default)]
pub struct NamedResultCache {
    entries: RwLock<HashMap<String, Arc<IdTable>>>,
}

impl NamedResultCache {
    pub fn new() -> NamedResultCache {
        NamedResultCache::default()
    }

    pub fn pin(&self, name: String, table: Arc<IdTable>) {
        self.entries.write().insert(name, table);
    }

    pub fn get(&self, name: &str) -> Option<Arc<IdTable>> {
        self.entries.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<IdTable>> {
        self.entries.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::LocalVocab;

    fn table_with_rows(n: usize) -> Arc<IdTable> {
        let mut table = IdTable::new(1, LocalVocab::new());
        for i in 0..n {
            table.push_row(&[crate::value::Id::from_int(i as i64)]);
        }
        Arc::new(table)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let cache = QueryResultCache::new(CacheConfig::new(10, 1_000_000, 1_000_000));
        cache.insert("k1".to_string(), table_with_rows(3));
        let got = cache.get("k1").unwrap();
        assert_eq!(got.num_rows(), 3);
    }

    #[test]
    fn eviction_respects_entry_count_cap() {
        let cache = QueryResultCache::new(CacheConfig::new(2, 1_000_000, 1_000_000));
        cache.insert("a".to_string(), table_with_rows(1));
        cache.insert("b".to_string(), table_with_rows(1));
        cache.insert("c".to_string(), table_with_rows(1));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn entries_over_the_single_entry_cap_are_not_cached() {
        let cache = QueryResultCache::new(CacheConfig::new(10, 1_000_000, 8));
        cache.insert("big".to_string(), table_with_rows(100));
        assert!(cache.get("big").is_none());
    }

    #[test]
    fn clear_on_allocation_drops_everything() {
        let cache = QueryResultCache::new(CacheConfig::new(10, 1_000_000, 1_000_000));
        cache.insert("a".to_string(), table_with_rows(1));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.current_size_bytes(), 0);
    }

    #[test]
    fn named_results_are_pinned_and_survive_independent_of_lru() {
        let named = NamedResultCache::new();
        named.pin("my_view".to_string(), table_with_rows(5));
        assert_eq!(named.get("my_view").unwrap().num_rows(), 5);
        assert!(named.get("missing").is_none());
        named.remove("my_view");
        assert!(named.get("my_view").is_none());
    }
}
