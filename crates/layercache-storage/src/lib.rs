//! layercache-storage: the settled-entry store behind the cache facade.
//!
//! This is the memory-only store (C4 of the coalescing cache design): a
//! keyed container with optional cache-wide expiration, optional rolling
//! refresh-on-access, and an optional FIFO/LRU capacity bound.

pub mod memory;

pub use memory::{EntryStore, StoreConfig};
