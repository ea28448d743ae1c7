//! layercache-core: core types, traits and cancellation primitives
//!
//! This crate provides the foundational vocabulary shared by the
//! coalescing cache facade and its storage layer: the error taxonomy, the
//! cancellation aggregator/disaggregator pair, the settled-entry type, and
//! the fetcher-chain abstraction.

mod cancel;
mod entry;
mod error;
mod fetch;
mod metrics;

#[cfg(feature = "tracing")]
mod tracing_metrics;

pub use cancel::{AllOf, AnyOf};
pub use entry::StoredEntry;
pub use error::{CacheError, Result};
pub use fetch::{BatchItem, Fetcher, FetcherChain, TerminalFetcher};
pub use metrics::{CacheMetrics, CacheOperation, CacheTier, EvictionReason, NoopMetrics};

#[cfg(feature = "tracing")]
pub use tracing_metrics::TracingMetrics;
