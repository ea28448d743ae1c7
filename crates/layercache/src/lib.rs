//! layercache: a request-coalescing, layered-fallback cache for cancellable
//! async fetches.
//!
//! For any given key at most one underlying fetch is ever in flight,
//! regardless of how many callers concurrently ask for it. Each caller
//! brings its own [`tokio_util::sync::CancellationToken`]; the underlying
//! fetch is cancelled only once every attached caller has cancelled.
//! Results are memoized under a configurable expiration/capacity policy,
//! and a miss falls through an ordered chain of lower-priority sources.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use layercache::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let chain = FetcherChain::single_source(TerminalFetcher::new(|key: &String, _token| {
//!         let key = key.clone();
//!         async move { Ok(key.len() as i32) }
//!     }));
//!     let cache: Cache<String, i32> = Cache::new(chain);
//!
//!     let token = tokio_util::sync::CancellationToken::new();
//!     let value = cache.get("hello".to_string(), token).await.unwrap();
//!     println!("got {value}");
//! }
//! ```

mod coalescer;
mod manager;

pub use coalescer::Coalescer;
pub use manager::{Cache, CacheConfig};

// Re-export the vocabulary crate so callers don't need a separate
// `layercache-core` dependency for the types they build fetchers with.
pub use layercache_core::{
    AllOf, AnyOf, BatchItem, CacheError, CacheMetrics, CacheOperation, CacheTier, EvictionReason, Fetcher,
    FetcherChain, NoopMetrics, Result, TerminalFetcher,
};

#[cfg(feature = "tracing")]
pub use layercache_core::TracingMetrics;

pub use layercache_storage::{EntryStore, StoreConfig};

/// Convenient glob import for building caches.
pub mod prelude {
    pub use crate::{
        AllOf, AnyOf, BatchItem, Cache, CacheConfig, CacheError, CacheMetrics, CacheOperation, CacheTier, Coalescer,
        EvictionReason, Fetcher, FetcherChain, NoopMetrics, Result, TerminalFetcher,
    };

    #[cfg(feature = "tracing")]
    pub use crate::TracingMetrics;
}
