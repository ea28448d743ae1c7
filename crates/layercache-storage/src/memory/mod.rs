//! In-memory entry store.

mod store;

pub use store::{EntryStore, StoreConfig};
