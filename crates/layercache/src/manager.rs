//! The cache facade: the public surface callers actually use.

use crate::coalescer::Coalescer;
use layercache_core::{
    CacheError, CacheMetrics, CacheOperation, CacheTier, EvictionReason, FetcherChain, NoopMetrics, Result,
};
use layercache_storage::{EntryStore, StoreConfig};
use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Tuning knobs for a [`Cache`]. Mirrors `spec.md`'s construction options.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Cache-wide expiration; `None` means entries never expire on their own.
    pub expiration: Option<Duration>,
    /// Measure expiration (and capacity recency) from last access, not insertion.
    pub rolling_expiration: bool,
    /// Trim the oldest entries once the store exceeds this size.
    pub max_entries: Option<usize>,
    /// If true, an entry is deleted immediately after its fetch settles —
    /// only the in-flight coalescing window is retained, not the value.
    pub no_retention: bool,
}

impl CacheConfig {
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

    pub fn no_retention(mut self) -> Self {
        self.no_retention = true;
        self
    }

    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            expiration: self.expiration,
            rolling_expiration: self.rolling_expiration,
            max_entries: self.max_entries,
        }
    }
}

/// Request-coalescing, layered-fallback cache.
///
/// `K` is the key type callers pass in and the fetcher chain always sees.
/// `K2` is the identity the store and coalescer actually key on — by
/// default the same as `K`, but [`Cache::with_key_transformer`] lets two
/// different `K`s share one store slot and one in-flight fetch by mapping
/// both to the same `K2`. Both must be cheap to clone — they ride through
/// the coalescer's in-flight bookkeeping and the store's order ring. `V` is
/// never cloned; every caller shares the same `Arc<V>`.
pub struct Cache<K, V, M = NoopMetrics, K2 = K> {
    store: EntryStore<K2, V>,
    coalescer: Coalescer<K2, V>,
    chain: Arc<FetcherChain<K, V>>,
    metrics: Arc<M>,
    config: CacheConfig,
    key_transform: Arc<dyn Fn(&K) -> K2 + Send + Sync>,
}

impl<K, V> Cache<K, V, NoopMetrics, K>
where
    K: Eq + Hash + Clone + ToString + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Build a cache with default config and no metrics collection.
    pub fn new(chain: FetcherChain<K, V>) -> Self {
        Self::with_config(chain, CacheConfig::default())
    }

    /// Build a cache with the given config and no metrics collection.
    pub fn with_config(chain: FetcherChain<K, V>, config: CacheConfig) -> Self {
        Self::with_key_transformer(chain, config, NoopMetrics, |k: &K| k.clone())
    }
}

impl<K, V, M> Cache<K, V, M, K>
where
    K: Eq + Hash + Clone + ToString + Send + Sync + 'static,
    V: Send + Sync + 'static,
    M: CacheMetrics,
{
    /// Build a cache with an explicit metrics collector and the identity
    /// key transform (`K2 = K`).
    pub fn with_metrics(chain: FetcherChain<K, V>, config: CacheConfig, metrics: M) -> Self {
        Self::with_key_transformer(chain, config, metrics, |k: &K| k.clone())
    }
}

impl<K, V, M, K2> Cache<K, V, M, K2>
where
    K: Eq + Hash + Clone + ToString + Send + Sync + 'static,
    V: Send + Sync + 'static,
    M: CacheMetrics,
    K2: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Build a cache whose store/coalescer identity is `key_transform(k)`
    /// rather than `k` itself. Two different `K`s that transform to the same
    /// `K2` coalesce into one in-flight fetch and one store slot; the
    /// fetcher chain, however, always receives the original `K` that
    /// triggered the miss (an arbitrary representative, if several collided
    /// on the same `K2`), never `K2` itself.
    pub fn with_key_transformer<F>(
        chain: FetcherChain<K, V>,
        config: CacheConfig,
        metrics: M,
        key_transform: F,
    ) -> Self
    where
        F: Fn(&K) -> K2 + Send + Sync + 'static,
    {
        Self {
            store: EntryStore::new(config.store_config()),
            coalescer: Coalescer::new(),
            chain: Arc::new(chain),
            metrics: Arc::new(metrics),
            config,
            key_transform: Arc::new(key_transform),
        }
    }

    /// Fetch `key`, joining any already in-flight request and falling
    /// through the fetcher chain on a miss. `token` governs this caller's
    /// participation only — the underlying fetch, if coalesced with other
    /// callers, keeps running until every attached token has fired.
    pub async fn get(&self, key: K, token: CancellationToken) -> Result<Arc<V>> {
        let start = Instant::now();
        let store_key = (self.key_transform)(&key);

        if let Some(value) = self.store.get(&store_key) {
            self.metrics.record_hit(&key.to_string(), CacheTier::Memory);
            self.metrics.record_latency(CacheOperation::Get, start.elapsed());
            return Ok(value);
        }
        self.metrics.record_miss(&key.to_string());

        // Captured before the fetch runs: if a `set`/`delete` lands on this
        // key while the fetch is in flight, it bumps (or clears) the
        // generation, and the install below is skipped in favor of it.
        let expected_generation = self.store.current_generation(&store_key);

        let chain = Arc::clone(&self.chain);
        let fetch_key = key.clone();
        let result = self
            .coalescer
            .run(store_key.clone(), token, move |derived| async move {
                chain.resolve(&fetch_key, derived).await
            })
            .await;

        self.metrics.record_latency(CacheOperation::Fetch, start.elapsed());

        if let Ok(value) = &result {
            let installed = self.store.set_if_unchanged(store_key.clone(), Arc::clone(value), expected_generation);
            if installed && self.config.no_retention {
                self.store.delete(&store_key);
                self.metrics.record_eviction(EvictionReason::NoRetention);
            }
        }

        result
    }

    /// Fetch many keys at once. Keys already present in the store are
    /// returned without touching the coalescer; absent keys are resolved
    /// together so a batch-capable head fetcher is called once with every
    /// miss, per [`layercache_core::FetcherChain::resolve_many`].
    ///
    /// If `key_transform` is non-injective, several original keys may share
    /// one `K2` identity; the fetcher chain is still called with one
    /// representative `K` per distinct `K2`, and its result is applied to
    /// every original key that mapped there.
    pub async fn get_many(&self, keys: Vec<K>, token: CancellationToken) -> HashMap<K, Result<Arc<V>>> {
        let mut out = HashMap::with_capacity(keys.len());
        let mut pending: Vec<(K, K2)> = Vec::new();
        let mut representative: HashMap<K2, K> = HashMap::new();
        let mut expected_generations: HashMap<K2, u64> = HashMap::new();
        let mut distinct_absent: Vec<K2> = Vec::new();

        for key in keys {
            let store_key = (self.key_transform)(&key);
            match self.store.get(&store_key) {
                Some(value) => {
                    self.metrics.record_hit(&key.to_string(), CacheTier::Memory);
                    out.insert(key, Ok(value));
                }
                None => {
                    self.metrics.record_miss(&key.to_string());
                    if let MapEntry::Vacant(slot) = representative.entry(store_key.clone()) {
                        expected_generations.insert(store_key.clone(), self.store.current_generation(&store_key));
                        distinct_absent.push(store_key.clone());
                        slot.insert(key.clone());
                    }
                    pending.push((key, store_key));
                }
            }
        }

        if distinct_absent.is_empty() {
            return out;
        }

        let chain = Arc::clone(&self.chain);
        let originals = representative.clone();
        let results = self
            .coalescer
            .run_batch(distinct_absent.clone(), token, move |leader_keys, derived| {
                let chain = Arc::clone(&chain);
                let originals = originals.clone();
                async move {
                    let original_keys: Vec<K> = leader_keys
                        .iter()
                        .map(|k2| {
                            originals
                                .get(k2)
                                .cloned()
                                .expect("every leader key must have a representative original key")
                        })
                        .collect();
                    let mut raw = chain.resolve_many(&original_keys, derived).await;
                    leader_keys
                        .into_iter()
                        .zip(original_keys)
                        .map(|(k2, k)| {
                            let result = raw.remove(&k).unwrap_or_else(|| {
                                Err(CacheError::Internal(
                                    "fetcher chain did not return an entry for every requested key".to_string(),
                                ))
                            });
                            (k2, result)
                        })
                        .collect()
                }
            })
            .await;

        for store_key in &distinct_absent {
            if let Some(Ok(value)) = results.get(store_key) {
                let expected = expected_generations[store_key];
                let installed = self.store.set_if_unchanged(store_key.clone(), Arc::clone(value), expected);
                if installed && self.config.no_retention {
                    self.store.delete(store_key);
                    self.metrics.record_eviction(EvictionReason::NoRetention);
                }
            }
        }

        for (key, store_key) in pending {
            if let Some(result) = results.get(&store_key) {
                out.insert(key, result.clone());
            }
        }

        out
    }

    /// Install a value directly, bypassing the fetcher chain entirely.
    pub fn set(&self, key: K, value: V) {
        self.store.set((self.key_transform)(&key), Arc::new(value));
    }

    /// Remove an entry. Returns whether one was present.
    pub fn delete(&self, key: &K) -> bool {
        let store_key = (self.key_transform)(key);
        let removed = self.store.delete(&store_key);
        if removed {
            self.metrics.record_eviction(EvictionReason::Invalidated);
        }
        removed
    }

    /// True iff an unexpired entry exists for `key`. Does not consult any
    /// in-flight fetch — a coalesced-but-unsettled request is not yet "had".
    pub fn has(&self, key: &K) -> bool {
        self.store.has(&(self.key_transform)(key))
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layercache_core::{Fetcher, TerminalFetcher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;
    use tokio::sync::Notify;

    fn counting_chain() -> (FetcherChain<String, i32>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let chain = FetcherChain::single_source(TerminalFetcher::new(move |key: &String, _tok| {
            calls2.fetch_add(1, Ordering::SeqCst);
            let key = key.clone();
            async move { Ok(key.len() as i32) }
        }));
        (chain, calls)
    }

    #[tokio::test]
    async fn cache_hit_after_first_success_does_not_refetch() {
        let (chain, calls) = counting_chain();
        let cache = Cache::new(chain);

        let first = cache.get("hello".to_string(), CancellationToken::new()).await.unwrap();
        assert_eq!(*first, 5);
        let second = cache.get("hello".to_string(), CancellationToken::new()).await.unwrap();
        assert_eq!(*second, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn idempotent_set_overwrites_without_refetch() {
        let (chain, calls) = counting_chain();
        let cache = Cache::new(chain);
        cache.set("k".to_string(), 99);
        cache.set("k".to_string(), 100);
        assert_eq!(*cache.get("k".to_string(), CancellationToken::new()).await.unwrap(), 100);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejection_is_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = Arc::clone(&attempts);
        let chain = FetcherChain::single_source(TerminalFetcher::new(move |_k: &String, _tok| {
            let attempts = Arc::clone(&attempts2);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CacheError::FetcherFailed {
                        source: "down".to_string(),
                    })
                } else {
                    Ok(1)
                }
            }
        }));
        let cache = Cache::new(chain);

        assert!(cache.get("k".to_string(), CancellationToken::new()).await.is_err());
        assert!(!cache.has(&"k".to_string()));
        assert_eq!(*cache.get("k".to_string(), CancellationToken::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn no_retention_drops_value_after_settling() {
        let (chain, calls) = counting_chain();
        let cache = Cache::new_with_config_for_test(chain, CacheConfig::default().no_retention());

        let value = cache.get("hello".to_string(), CancellationToken::new()).await.unwrap();
        assert_eq!(*value, 5);
        assert!(!cache.has(&"hello".to_string()));

        let _ = cache.get("hello".to_string(), CancellationToken::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2, "no-retention must refetch every time");
    }

    #[tokio::test]
    async fn two_layer_fallback_tries_primary_then_secondary() {
        let chain: FetcherChain<String, i32> = FetcherChain::builder()
            .then(Fetcher::single(|key: &String, _tok| {
                let key = key.clone();
                async move { if key == "known" { Ok(Some(1)) } else { Ok(None) } }
            }))
            .terminal(TerminalFetcher::new(|_k: &String, _tok| async { Ok(-1) }));
        let cache = Cache::new(chain);

        assert_eq!(*cache.get("known".to_string(), CancellationToken::new()).await.unwrap(), 1);
        assert_eq!(*cache.get("unknown".to_string(), CancellationToken::new()).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn batch_get_many_heterogeneous_hit_and_miss() {
        let batch_calls = Arc::new(AtomicUsize::new(0));
        let batch_calls2 = Arc::clone(&batch_calls);
        let chain: FetcherChain<String, i32> = FetcherChain::builder()
            .then(Fetcher::batch(move |keys, _tok| {
                batch_calls2.fetch_add(1, Ordering::SeqCst);
                let keys = keys.to_vec();
                async move {
                    Ok(keys
                        .into_iter()
                        .map(|k| {
                            let v = if k == "b" { 1 } else { 2 };
                            layercache_core::BatchItem::found(k, v)
                        })
                        .collect())
                }
            }))
            .terminal(TerminalFetcher::new(|_k: &String, _tok| async { Ok(-1) }));
        let cache = Cache::new(chain);
        cache.set("a".to_string(), 0);

        let results = cache
            .get_many(vec!["a".to_string(), "b".to_string(), "c".to_string()], CancellationToken::new())
            .await;

        assert_eq!(*results["a"].as_ref().unwrap(), 0);
        assert_eq!(*results["b"].as_ref().unwrap(), 1);
        assert_eq!(*results["c"].as_ref().unwrap(), 2);
        assert_eq!(batch_calls.load(Ordering::SeqCst), 1, "batch fetcher must be invoked exactly once");
    }

    #[tokio::test]
    async fn capacity_trim_applies_through_the_facade() {
        let chain: FetcherChain<String, i32> =
            FetcherChain::single_source(TerminalFetcher::new(|_k: &String, _tok| async { Ok(0) }));
        let cache = Cache::new_with_config_for_test(chain, CacheConfig::default().with_max_entries(2));
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.set("c".to_string(), 3);
        assert_eq!(cache.len(), 2);
        assert!(!cache.has(&"a".to_string()));
    }

    #[tokio::test]
    async fn ttl_honored_through_the_facade() {
        let chain: FetcherChain<String, i32> =
            FetcherChain::single_source(TerminalFetcher::new(|_k: &String, _tok| async { Ok(0) }));
        let cache =
            Cache::new_with_config_for_test(chain, CacheConfig::default().with_expiration(StdDuration::from_millis(15)));
        cache.set("a".to_string(), 1);
        assert!(cache.has(&"a".to_string()));
        tokio::time::sleep(StdDuration::from_millis(25)).await;
        assert!(!cache.has(&"a".to_string()));
    }

    #[tokio::test]
    async fn set_during_pending_fetch_is_not_overwritten() {
        let fetch_started = Arc::new(Notify::new());
        let release_fetch = Arc::new(Notify::new());
        let fetch_started2 = Arc::clone(&fetch_started);
        let release_fetch2 = Arc::clone(&release_fetch);
        let chain = FetcherChain::single_source(TerminalFetcher::new(move |_k: &String, _tok| {
            let fetch_started = Arc::clone(&fetch_started2);
            let release_fetch = Arc::clone(&release_fetch2);
            async move {
                fetch_started.notify_one();
                release_fetch.notified().await;
                Ok(111)
            }
        }));
        let cache = Arc::new(Cache::new(chain));

        let cache2 = Arc::clone(&cache);
        let getter = tokio::spawn(async move { cache2.get("k".to_string(), CancellationToken::new()).await });

        fetch_started.notified().await;
        // A manual set lands while the fetch above is still in flight.
        cache.set("k".to_string(), 7);

        release_fetch.notify_one();
        let fetched = getter.await.unwrap().unwrap();
        assert_eq!(*fetched, 111, "the caller who triggered the fetch still observes its own result");

        // But the store must retain the intervening manual set, not the
        // fetch's settlement — the fetch's install is discarded on collision.
        assert_eq!(
            *cache.get("k".to_string(), CancellationToken::new()).await.unwrap(),
            7,
            "a set issued while a fetch is in flight must win over that fetch's own store install"
        );
    }

    #[tokio::test]
    async fn key_transformer_coalesces_distinct_keys_into_one_slot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let chain = FetcherChain::single_source(TerminalFetcher::new(move |key: &String, _tok| {
            calls2.fetch_add(1, Ordering::SeqCst);
            let key = key.clone();
            async move { Ok(key) }
        }));
        // normalize case so "Key" and "key" share one identity.
        let cache: Cache<String, String, NoopMetrics, String> =
            Cache::with_key_transformer(chain, CacheConfig::default(), NoopMetrics, |k: &String| k.to_lowercase());

        let first = cache.get("Key".to_string(), CancellationToken::new()).await.unwrap();
        let second = cache.get("key".to_string(), CancellationToken::new()).await.unwrap();
        assert_eq!(*first, "Key");
        assert_eq!(*second, "Key", "second call must hit the shared slot, not refetch under its own casing");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    // Test-only constructor so config-bearing tests don't need a metrics
    // type parameter spelled out at every call site.
    impl Cache<String, i32, NoopMetrics, String> {
        fn new_with_config_for_test(chain: FetcherChain<String, i32>, config: CacheConfig) -> Self {
            Cache::with_config(chain, config)
        }
    }
}
