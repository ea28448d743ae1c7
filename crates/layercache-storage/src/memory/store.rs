//! The settled-entry store: `DashMap` for keyed access, a side
//! `RwLock<VecDeque<K>>` for insertion order.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use layercache_core::StoredEntry;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Construction options for an [`EntryStore`].
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Cache-wide expiration. `None` means entries never expire on their own.
    pub expiration: Option<Duration>,
    /// If true, expiration is measured from the last read, not from
    /// insertion, and a read pushes the key to the tail of the order ring
    /// (turning capacity trim from FIFO into LRU).
    pub rolling_expiration: bool,
    /// If set, after any insertion the oldest entries are trimmed until the
    /// store holds at most this many.
    pub max_entries: Option<usize>,
}

impl StoreConfig {
    pub fn with_expiration(mut self, ttl: Duration) -> Self {
        self.expiration = Some(ttl);
        self
    }

    pub fn rolling(mut self) -> Self {
        self.rolling_expiration = true;
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }
}

/// Keyed container for settled fetch results.
///
/// Cloning `K` on every order-ring mutation is intentional: keys are
/// expected to be small (strings, ids), and this keeps the ring a plain
/// `VecDeque` instead of a doubly-linked structure with its own unsafe
/// bookkeeping.
pub struct EntryStore<K, V> {
    entries: DashMap<K, StoredEntry<V>>,
    order: RwLock<VecDeque<K>>,
    config: StoreConfig,
    next_generation: AtomicU64,
}

impl<K, V> EntryStore<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(config: StoreConfig) -> Self {
        Self {
            entries: DashMap::new(),
            order: RwLock::new(VecDeque::new()),
            config,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Mint a fresh, strictly increasing generation stamp.
    fn fresh_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// The generation currently stamped on `key`'s entry, or `0` if absent.
    /// `0` is a reserved sentinel: [`EntryStore::fresh_generation`] starts
    /// counting at `1`, so it never collides with "no entry yet".
    pub fn current_generation(&self, key: &K) -> u64 {
        self.entries.get(key).map(|e| e.generation()).unwrap_or(0)
    }

    fn is_expired(&self, entry: &StoredEntry<V>) -> bool {
        match self.config.expiration {
            None => false,
            Some(ttl) => {
                let reference = if self.config.rolling_expiration {
                    entry.last_accessed_at()
                } else {
                    entry.inserted_at()
                };
                reference.elapsed() >= ttl
            }
        }
    }

    /// Look up a key, sweeping it if it has expired. A hit touches the
    /// entry's last-accessed clock and, under rolling expiration, pushes the
    /// key to the tail of the order ring.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let outcome = self.entries.get(key).map(|entry| {
            if self.is_expired(&entry) {
                None
            } else {
                entry.touch();
                Some(entry.value())
            }
        });

        match outcome {
            None => None,
            Some(None) => {
                self.delete(key);
                None
            }
            Some(Some(value)) => {
                if self.config.rolling_expiration {
                    self.refresh_order(key);
                }
                Some(value)
            }
        }
    }

    /// True iff an unexpired entry exists for `key`.
    pub fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Install `value`, refreshing the slot (and order position) if `key`
    /// already held an entry, then trim to `max_entries` if configured.
    pub fn set(&self, key: K, value: Arc<V>) {
        let entry = StoredEntry::new(value, self.fresh_generation());
        let existed = self.entries.insert(key.clone(), entry).is_some();

        {
            let mut order = self.order.write();
            if existed {
                if let Some(pos) = order.iter().position(|k| k == &key) {
                    order.remove(pos);
                }
            }
            order.push_back(key);
        }

        self.trim_to_capacity();
    }

    /// Install `value` only if `key`'s generation still matches
    /// `expected_generation` — i.e. nothing raced ahead of whoever captured
    /// that generation (via [`EntryStore::current_generation`]) and mutated
    /// the slot first. Returns whether the install happened.
    ///
    /// `expected_generation == 0` means "the key was absent when I
    /// captured it"; the install is then only allowed against a still-empty
    /// slot. A racing `delete` and a racing `set` both bump or remove the
    /// generation, so either is correctly detected as a collision.
    pub fn set_if_unchanged(&self, key: K, value: Arc<V>, expected_generation: u64) -> bool {
        let installed = match self.entries.entry(key.clone()) {
            Entry::Vacant(slot) => {
                if expected_generation != 0 {
                    false
                } else {
                    slot.insert(StoredEntry::new(value, self.fresh_generation()));
                    true
                }
            }
            Entry::Occupied(mut slot) => {
                if slot.get().generation() != expected_generation {
                    false
                } else {
                    slot.insert(StoredEntry::new(value, self.fresh_generation()));
                    true
                }
            }
        };

        if installed {
            let mut order = self.order.write();
            if let Some(pos) = order.iter().position(|k| k == &key) {
                order.remove(pos);
            }
            order.push_back(key);
            drop(order);
            self.trim_to_capacity();
        }

        installed
    }

    /// Remove an entry unconditionally. Returns whether one was present.
    pub fn delete(&self, key: &K) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            let mut order = self.order.write();
            if let Some(pos) = order.iter().position(|k| k == key) {
                order.remove(pos);
            }
        }
        removed
    }

    fn refresh_order(&self, key: &K) {
        let mut order = self.order.write();
        if let Some(pos) = order.iter().position(|k| k == key) {
            if let Some(k) = order.remove(pos) {
                order.push_back(k);
            }
        }
    }

    fn trim_to_capacity(&self) {
        let Some(max) = self.config.max_entries else {
            return;
        };
        loop {
            let oldest = {
                let order = self.order.read();
                if order.len() <= max {
                    break;
                }
                order.front().cloned()
            };
            match oldest {
                Some(key) => {
                    self.delete(&key);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in current insertion/recency order, oldest first. Exposed for
    /// tests and diagnostics.
    pub fn iterate_oldest_first(&self) -> Vec<K> {
        self.order.read().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.order.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn store(config: StoreConfig) -> EntryStore<String, i32> {
        EntryStore::new(config)
    }

    #[test]
    fn set_then_get_round_trips() {
        let s = store(StoreConfig::default());
        s.set("a".into(), Arc::new(1));
        assert_eq!(*s.get(&"a".to_string()).unwrap(), 1);
        assert!(s.has(&"a".to_string()));
        assert!(!s.has(&"missing".to_string()));
    }

    #[test]
    fn set_on_existing_key_refreshes_slot() {
        let s = store(StoreConfig::default().with_max_entries(2));
        s.set("a".into(), Arc::new(1));
        s.set("b".into(), Arc::new(2));
        s.set("a".into(), Arc::new(10));
        // re-inserting "a" must not evict it via FIFO trim ordering.
        assert_eq!(s.iterate_oldest_first(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(*s.get(&"a".to_string()).unwrap(), 10);
    }

    #[test]
    fn ttl_honored_non_rolling() {
        let s = store(StoreConfig::default().with_expiration(StdDuration::from_millis(15)));
        s.set("a".into(), Arc::new(1));
        assert!(s.has(&"a".to_string()));
        std::thread::sleep(StdDuration::from_millis(25));
        assert!(!s.has(&"a".to_string()));
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn ttl_honored_rolling_extends_on_read() {
        let s = store(
            StoreConfig::default()
                .with_expiration(StdDuration::from_millis(30))
                .rolling(),
        );
        s.set("a".into(), Arc::new(1));
        std::thread::sleep(StdDuration::from_millis(20));
        assert!(s.has(&"a".to_string())); // read refreshes the clock
        std::thread::sleep(StdDuration::from_millis(20));
        assert!(s.has(&"a".to_string())); // would be expired if not rolling
    }

    #[test]
    fn capacity_fifo_keeps_most_recent() {
        let s = store(StoreConfig::default().with_max_entries(3));
        for i in 0..5 {
            s.set(format!("k{i}"), Arc::new(i));
        }
        assert_eq!(s.len(), 3);
        assert_eq!(
            s.iterate_oldest_first(),
            vec!["k2".to_string(), "k3".to_string(), "k4".to_string()]
        );
    }

    #[test]
    fn capacity_lru_under_rolling_keeps_recently_read() {
        let s = store(StoreConfig::default().with_max_entries(2).rolling());
        s.set("a".into(), Arc::new(1));
        s.set("b".into(), Arc::new(2));
        // touch "a" so it is no longer the least-recently-used key.
        let _ = s.get(&"a".to_string());
        s.set("c".into(), Arc::new(3));
        assert!(s.has(&"a".to_string()));
        assert!(!s.has(&"b".to_string()));
        assert!(s.has(&"c".to_string()));
    }

    #[test]
    fn delete_removes_from_order_ring() {
        let s = store(StoreConfig::default());
        s.set("a".into(), Arc::new(1));
        assert!(s.delete(&"a".to_string()));
        assert!(!s.delete(&"a".to_string()));
        assert!(s.iterate_oldest_first().is_empty());
    }

    #[test]
    fn set_if_unchanged_installs_into_a_still_absent_slot() {
        let s = store(StoreConfig::default());
        let gen = s.current_generation(&"a".to_string());
        assert_eq!(gen, 0);
        assert!(s.set_if_unchanged("a".into(), Arc::new(1), gen));
        assert_eq!(*s.get(&"a".to_string()).unwrap(), 1);
    }

    #[test]
    fn set_if_unchanged_skips_when_a_set_raced_ahead() {
        let s = store(StoreConfig::default());
        let gen = s.current_generation(&"a".to_string());
        // a manual set lands first, bumping the generation.
        s.set("a".into(), Arc::new(99));
        assert!(!s.set_if_unchanged("a".into(), Arc::new(1), gen));
        assert_eq!(*s.get(&"a".to_string()).unwrap(), 99);
    }

    #[test]
    fn set_if_unchanged_skips_when_a_delete_raced_ahead() {
        let s = store(StoreConfig::default());
        s.set("a".into(), Arc::new(1));
        let gen = s.current_generation(&"a".to_string());
        s.delete(&"a".to_string());
        assert!(!s.set_if_unchanged("a".into(), Arc::new(2), gen));
        assert!(!s.has(&"a".to_string()));
    }

    #[test]
    fn set_if_unchanged_succeeds_when_nothing_raced() {
        let s = store(StoreConfig::default());
        s.set("a".into(), Arc::new(1));
        let gen = s.current_generation(&"a".to_string());
        assert!(s.set_if_unchanged("a".into(), Arc::new(2), gen));
        assert_eq!(*s.get(&"a".to_string()).unwrap(), 2);
    }
}
