//! Request coalescing: for any given key at most one fetch is in flight.
//!
//! One caller claims leadership over a set of keys and spawns a detached
//! task to actually run the fetch; every caller — leader and followers
//! alike — only ever *observes* that task's eventual broadcast. This
//! decoupling matters: a caller's own future resolves the moment its own
//! token fires, even if the underlying fetch keeps running for other
//! callers still attached. The underlying task itself is driven by a
//! derived cancellation token from [`AllOf`] — it only stops once every
//! attached caller token has fired.
//!
//! Single-key `get` and batched `get_many` share the same machinery: a
//! single-key fetch is a batch of one, and a batch fetch installs one
//! record per key, all pointing at the same broadcast sender and the same
//! aggregator, so a later single-key caller for any key in that batch
//! joins it instead of starting a redundant fetch.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use layercache_core::{AllOf, CacheError};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

type Settlement<V> = Result<Arc<V>, CacheError>;
type BatchResult<K, V> = Arc<HashMap<K, Settlement<V>>>;

struct InFlight<K, V> {
    tx: broadcast::Sender<BatchResult<K, V>>,
    aggregator: Arc<AllOf>,
}

enum Claim<K, V> {
    Leader,
    Follower(broadcast::Receiver<BatchResult<K, V>>),
}

fn missing_key_error<K, V>(_key: &K) -> Settlement<V> {
    Err(CacheError::Internal(
        "key missing from coalesced batch result".to_string(),
    ))
}

/// Per-key in-flight registry, shared by the cache facade.
pub struct Coalescer<K, V> {
    inflight: Arc<DashMap<K, InFlight<K, V>>>,
}

impl<K, V> Default for Coalescer<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Coalescer<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
        }
    }

    /// Number of keys with a fetch currently in flight. Test/diagnostic helper.
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Join `key`'s in-flight record if one exists, otherwise install a
    /// fresh record sharing `leader_tx`/`leader_aggregator` and claim
    /// leadership of `key`. Spins (yielding between attempts) past the
    /// narrow window where a record's aggregator has just fired but the
    /// task driving it hasn't removed the map entry yet.
    async fn claim_key(
        &self,
        key: &K,
        token: CancellationToken,
        leader_tx: &broadcast::Sender<BatchResult<K, V>>,
        leader_aggregator: &Arc<AllOf>,
    ) -> Claim<K, V> {
        loop {
            match self.inflight.entry(key.clone()) {
                Entry::Occupied(occupied) => {
                    if occupied.get().aggregator.add(token.clone()) {
                        return Claim::Follower(occupied.get().tx.subscribe());
                    }
                    // The record's aggregator already fired; its driving
                    // task will remove this entry shortly.
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(InFlight {
                        tx: leader_tx.clone(),
                        aggregator: Arc::clone(leader_aggregator),
                    });
                    return Claim::Leader;
                }
            }
            tokio::task::yield_now().await;
        }
    }

    /// Run (or join) a coalesced fetch for one key.
    pub async fn run<F, Fut>(&self, key: K, token: CancellationToken, fetch: F) -> Settlement<V>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        let key_for_result = key.clone();
        let mut results = self
            .run_batch(vec![key], token, move |mut keys, derived| {
                let only_key = keys.pop().expect("run_batch called with exactly one key");
                async move {
                    let mut map = HashMap::with_capacity(1);
                    map.insert(only_key, fetch(derived).await);
                    map
                }
            })
            .await;

        results
            .remove(&key_for_result)
            .unwrap_or_else(|| missing_key_error(&key_for_result))
    }

    /// Run (or join) a coalesced fetch covering every key in `keys`.
    ///
    /// `fetch_many` is invoked once, in a detached task, with exactly the
    /// subset of `keys` this call ended up leading (which may be fewer than
    /// `keys` if other keys were already in flight under a different
    /// leader); it must return an entry for every key it was given.
    ///
    /// Each caller's own `token` is raced independently against the shared
    /// settlement: a caller whose token fires first gets `Cancelled`
    /// immediately for every key in this call, even if other callers (or
    /// the initial leader's own prior call) keep the underlying fetch
    /// alive and it eventually succeeds for them.
    pub async fn run_batch<F, Fut>(
        &self,
        keys: Vec<K>,
        token: CancellationToken,
        fetch_many: F,
    ) -> HashMap<K, Settlement<V>>
    where
        F: FnOnce(Vec<K>, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = HashMap<K, Result<V, CacheError>>> + Send + 'static,
    {
        if keys.is_empty() {
            return HashMap::new();
        }
        if token.is_cancelled() {
            return keys.into_iter().map(|k| (k, Err(CacheError::cancelled()))).collect();
        }

        let (tx, _rx) = broadcast::channel(1);
        let (aggregator, derived) = AllOf::new();
        aggregator.add(token.clone());

        let mut leader_keys = Vec::new();
        let mut follower_keys = Vec::new();
        for key in &keys {
            match self.claim_key(key, token.clone(), &tx, &aggregator).await {
                Claim::Leader => leader_keys.push(key.clone()),
                Claim::Follower(rx) => follower_keys.push((key.clone(), rx)),
            }
        }

        // Subscribe before spawning the driving task so its broadcast
        // (capacity 1) can never be sent before we're listening.
        let own_leader_rx = if leader_keys.is_empty() {
            None
        } else {
            Some(tx.subscribe())
        };

        if !leader_keys.is_empty() {
            let inflight = Arc::clone(&self.inflight);
            let task_keys = leader_keys.clone();
            let task_derived = derived.clone();
            let task_aggregator = Arc::clone(&aggregator);
            let task_tx = tx.clone();
            tokio::spawn(async move {
                let fut = fetch_many(task_keys.clone(), task_derived.clone());
                let raw: HashMap<K, Result<V, CacheError>> = tokio::select! {
                    res = fut => res,
                    _ = task_derived.cancelled() => task_keys
                        .iter()
                        .cloned()
                        .map(|k| (k, Err(CacheError::cancelled())))
                        .collect(),
                };
                let settled: HashMap<K, Settlement<V>> =
                    raw.into_iter().map(|(k, r)| (k, r.map(Arc::new))).collect();

                for key in &task_keys {
                    inflight.remove(key);
                }
                task_aggregator.cleanup();

                if task_tx.receiver_count() > 0 {
                    let _ = task_tx.send(Arc::new(settled));
                }
            });
        } else {
            // Every key was already in flight elsewhere; our aggregator was
            // never installed anywhere, just stop watching our own token.
            aggregator.cleanup();
        }

        let mut out = HashMap::with_capacity(keys.len());

        if let Some(mut rx) = own_leader_rx {
            // `biased` with recv listed first: a settlement already broadcast
            // must win over a token that only happens to fire on the same
            // poll, or a late cancel would shadow a result that already landed.
            let settled: Option<BatchResult<K, V>> = tokio::select! {
                biased;
                recv = rx.recv() => recv.ok(),
                _ = token.cancelled() => None,
            };
            for key in &leader_keys {
                let settlement = match &settled {
                    Some(map) => map.get(key).cloned().unwrap_or_else(|| missing_key_error(key)),
                    None => Err(CacheError::cancelled()),
                };
                out.insert(key.clone(), settlement);
            }
        }

        for (key, mut rx) in follower_keys {
            let settlement = tokio::select! {
                biased;
                recv = rx.recv() => match recv {
                    Ok(map) => map.get(&key).cloned().unwrap_or_else(|| missing_key_error(&key)),
                    Err(_) => Err(CacheError::Internal(
                        "leader task dropped without settling the request".to_string(),
                    )),
                },
                _ = token.cancelled() => Err(CacheError::cancelled()),
            };
            out.insert(key, settlement);
        }

        out
    }
}
