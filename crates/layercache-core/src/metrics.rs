//! Metrics trait for cache observability.

use std::time::Duration;

/// Which source actually satisfied a `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    /// Value was already resolved in the store.
    Memory,
    /// Caller's request joined an already-in-flight fetch.
    Coalesced,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Coalesced => "coalesced",
        }
    }
}

/// Cache operation for latency tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOperation {
    Get,
    Set,
    Delete,
    Fetch,
}

impl CacheOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Get => "get",
            CacheOperation::Set => "set",
            CacheOperation::Delete => "delete",
            CacheOperation::Fetch => "fetch",
        }
    }
}

/// Reason an entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Cache-wide expiration elapsed.
    Expired,
    /// `max_entries` was exceeded.
    Capacity,
    /// Explicit `delete` call.
    Invalidated,
    /// Replaced by a subsequent `set`.
    Replaced,
    /// No-retention mode: purged immediately after the fetch settled.
    NoRetention,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Expired => "expired",
            EvictionReason::Capacity => "capacity",
            EvictionReason::Invalidated => "invalidated",
            EvictionReason::Replaced => "replaced",
            EvictionReason::NoRetention => "no_retention",
        }
    }
}

/// Implement this to route cache observability into your metrics system
/// (Prometheus, StatsD, `tracing` spans, ...).
pub trait CacheMetrics: Send + Sync + 'static {
    /// A `get` was satisfied without starting a new fetch.
    fn record_hit(&self, key: &str, tier: CacheTier);

    /// A `get` missed the store and the head fetcher had to run.
    fn record_miss(&self, key: &str);

    /// An operation's wall-clock duration.
    fn record_latency(&self, operation: CacheOperation, duration: Duration);

    /// An entry left the store.
    fn record_eviction(&self, reason: EvictionReason);

    /// Current store occupancy, sampled after a mutating operation.
    fn record_size(&self, size: usize);
}

/// Zero-overhead default: discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    #[inline]
    fn record_hit(&self, _key: &str, _tier: CacheTier) {}

    #[inline]
    fn record_miss(&self, _key: &str) {}

    #[inline]
    fn record_latency(&self, _operation: CacheOperation, _duration: Duration) {}

    #[inline]
    fn record_eviction(&self, _reason: EvictionReason) {}

    #[inline]
    fn record_size(&self, _size: usize) {}
}
