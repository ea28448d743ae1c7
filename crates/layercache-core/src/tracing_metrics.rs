//! [`CacheMetrics`] adapter that logs events through `tracing`.

use crate::metrics::{CacheMetrics, CacheOperation, CacheTier, EvictionReason};
use std::time::Duration;
use tracing::{debug, trace};

/// Routes every cache observation to a `tracing` span under the
/// `layercache` target. No metrics backend required; pair with whatever
/// `tracing_subscriber` layer the host application already runs.
#[derive(Debug, Clone, Default)]
pub struct TracingMetrics {
    service_name: Option<String>,
}

impl TracingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

impl CacheMetrics for TracingMetrics {
    fn record_hit(&self, key: &str, tier: CacheTier) {
        debug!(
            target: "layercache",
            event = "hit",
            key = %key,
            tier = ?tier,
            service = ?self.service_name,
            "cache hit"
        );
    }

    fn record_miss(&self, key: &str) {
        debug!(
            target: "layercache",
            event = "miss",
            key = %key,
            service = ?self.service_name,
            "cache miss"
        );
    }

    fn record_latency(&self, operation: CacheOperation, duration: Duration) {
        trace!(
            target: "layercache",
            event = "latency",
            operation = ?operation,
            duration_ms = duration.as_millis(),
            service = ?self.service_name,
            "cache operation latency"
        );
    }

    fn record_eviction(&self, reason: EvictionReason) {
        debug!(
            target: "layercache",
            event = "eviction",
            reason = ?reason,
            service = ?self.service_name,
            "cache eviction"
        );
    }

    fn record_size(&self, size: usize) {
        trace!(
            target: "layercache",
            event = "size",
            size = size,
            service = ?self.service_name,
            "cache size update"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_service_name() {
        let metrics = TracingMetrics::new().with_service_name("payments");
        assert_eq!(metrics.service_name.as_deref(), Some("payments"));
    }

    #[test]
    fn record_calls_do_not_panic_without_subscriber() {
        let metrics = TracingMetrics::new();
        metrics.record_hit("k", CacheTier::Memory);
        metrics.record_miss("k");
        metrics.record_latency(CacheOperation::Get, Duration::from_micros(50));
        metrics.record_eviction(EvictionReason::Replaced);
        metrics.record_size(1);
    }
}
