//! The settled entry shape held by the entry store.
//!
//! Pending state (the in-flight fetch, its aggregator) lives entirely in
//! the coalescer — see `layercache::coalescer`. Once a fetch settles
//! successfully, a [`StoredEntry`] is what the store actually retains.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// A resolved cache entry: a shared value plus the timestamps eviction
/// policy needs.
///
/// `generation` is a store-assigned, strictly increasing stamp given to
/// every installed entry. It lets a caller who captured a key's generation
/// before starting a fetch detect, once that fetch settles, whether a
/// `set`/`delete` got there first and skip clobbering it — see
/// `EntryStore::set_if_unchanged`.
pub struct StoredEntry<V> {
    value: Arc<V>,
    generation: u64,
    inserted_at: Instant,
    last_accessed_at: Mutex<Instant>,
}

impl<V> StoredEntry<V> {
    /// Wrap a freshly resolved value, stamped with `generation`.
    pub fn new(value: Arc<V>, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            value,
            generation,
            inserted_at: now,
            last_accessed_at: Mutex::new(now),
        }
    }

    /// The shared value.
    pub fn value(&self) -> Arc<V> {
        Arc::clone(&self.value)
    }

    /// The generation this entry was installed under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When this entry was inserted (or last `set`, which re-inserts).
    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    /// When this entry was last read. Updated by [`StoredEntry::touch`].
    pub fn last_accessed_at(&self) -> Instant {
        *self.last_accessed_at.lock()
    }

    /// Record a read, refreshing the rolling-expiration clock.
    pub fn touch(&self) {
        *self.last_accessed_at.lock() = Instant::now();
    }
}
