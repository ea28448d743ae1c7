//! Fetcher chain: the ordered list of sources a cache miss falls through.
//!
//! A chain is a `Vec` of [`Fetcher`]s tried in order. The first fetcher to
//! produce `Some(value)` (or, for a batch fetcher, a non-`None` selection for
//! a given key) wins; the rest of the chain is skipped for that key. The tail
//! fetcher must be incapable of returning "no value" for a key the chain is
//! asked about, otherwise a batch of misses would simply fall off the end
//! with nothing to report. [`TerminalFetcher`] makes that a construction-time
//! guarantee rather than a runtime one.

use crate::error::CacheError;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// One key/value pair out of a batch fetch, alongside whether that key was
/// actually found by the underlying source.
pub struct BatchItem<K, V> {
    pub key: K,
    pub value: Option<V>,
}

impl<K, V> BatchItem<K, V> {
    pub fn found(key: K, value: V) -> Self {
        Self {
            key,
            value: Some(value),
        }
    }

    pub fn missing(key: K) -> Self {
        Self { key, value: None }
    }
}

type SingleFn<K, V> =
    Box<dyn Fn(&K, CancellationToken) -> BoxFuture<'static, Result<Option<V>, CacheError>> + Send + Sync>;

type BatchFn<K, V> =
    Box<dyn Fn(&[K], CancellationToken) -> BoxFuture<'static, Result<Vec<BatchItem<K, V>>, CacheError>> + Send + Sync>;

/// One source in a [`FetcherChain`].
pub enum Fetcher<K, V> {
    /// Resolves one key at a time.
    Single(SingleFn<K, V>),
    /// Resolves many keys in one underlying call; `select` picks the value
    /// for a particular key out of the batch's result set.
    Batch(BatchFn<K, V>),
}

impl<K, V> Fetcher<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Build a [`Fetcher::Single`] from an async closure.
    pub fn single<F, Fut>(f: F) -> Self
    where
        F: Fn(&K, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<V>, CacheError>> + Send + 'static,
    {
        Fetcher::Single(Box::new(move |key, token| Box::pin(f(key, token))))
    }

    /// Build a [`Fetcher::Batch`] from an async closure.
    pub fn batch<F, Fut>(f: F) -> Self
    where
        F: Fn(&[K], CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<BatchItem<K, V>>, CacheError>> + Send + 'static,
    {
        Fetcher::Batch(Box::new(move |keys, token| Box::pin(f(keys, token))))
    }

    async fn resolve_one(&self, key: &K, token: CancellationToken) -> Result<Option<V>, CacheError> {
        match self {
            Fetcher::Single(f) => f(key, token).await,
            Fetcher::Batch(f) => {
                let items = f(std::slice::from_ref(key), token).await?;
                Ok(items.into_iter().find(|item| item.value.is_some()).and_then(|item| item.value))
            }
        }
    }
}

/// A fetcher known, at construction time, to never report a key missing.
///
/// Wraps a `Fetcher::Single` whose closure returns `Result<V, CacheError>`
/// instead of `Result<Option<V>, CacheError>` — there is no `None` to
/// propagate, so the type system rules out an empty chain tail.
pub struct TerminalFetcher<K, V>(SingleFn<K, V>);

impl<K, V> TerminalFetcher<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(&K, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        TerminalFetcher(Box::new(move |key, token| {
            let fut = f(key, token);
            Box::pin(async move { fut.await.map(Some) })
        }))
    }

    fn into_fetcher(self) -> Fetcher<K, V> {
        Fetcher::Single(self.0)
    }
}

/// Builds a [`FetcherChain`] such that the tail is, at the type level,
/// required to be a [`TerminalFetcher`].
pub struct FetcherChainBuilder<K, V> {
    fetchers: Vec<Fetcher<K, V>>,
}

impl<K, V> FetcherChainBuilder<K, V> {
    pub fn new() -> Self {
        Self { fetchers: Vec::new() }
    }

    /// Append a fallible (possibly-missing) fetcher before the terminal one.
    pub fn then(mut self, fetcher: Fetcher<K, V>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    /// Finish the chain with a fetcher that cannot report a miss.
    pub fn terminal(mut self, fetcher: TerminalFetcher<K, V>) -> FetcherChain<K, V> {
        self.fetchers.push(fetcher.into_fetcher());
        FetcherChain {
            fetchers: self.fetchers,
        }
    }
}

impl<K, V> Default for FetcherChainBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered list of fetchers, first non-null answer wins.
pub struct FetcherChain<K, V> {
    fetchers: Vec<Fetcher<K, V>>,
}

impl<K, V> FetcherChain<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Start building a chain. Finish with [`FetcherChainBuilder::terminal`].
    pub fn builder() -> FetcherChainBuilder<K, V> {
        FetcherChainBuilder::new()
    }

    /// A chain with a single terminal fetcher and nothing ahead of it.
    pub fn single_source(fetcher: TerminalFetcher<K, V>) -> Self {
        Self::builder().terminal(fetcher)
    }

    /// Walk the chain for one key, stopping at the first fetcher that
    /// produces a value. `token` is threaded through unmodified so a
    /// fetcher observes the caller-derived cancellation.
    pub async fn resolve(&self, key: &K, token: CancellationToken) -> Result<V, CacheError> {
        self.resolve_from(0, key, token).await
    }

    async fn resolve_from(&self, start: usize, key: &K, token: CancellationToken) -> Result<V, CacheError> {
        for fetcher in &self.fetchers[start..] {
            if token.is_cancelled() {
                return Err(CacheError::cancelled());
            }
            if let Some(value) = fetcher.resolve_one(key, token.clone()).await? {
                return Ok(value);
            }
        }
        Err(CacheError::NoFetcherProduced)
    }

    /// Resolve many keys at once, preserving the "batched selector"
    /// optimization: if the chain's head is a [`Fetcher::Batch`], it is
    /// called exactly once with the full key list; keys the batch didn't
    /// answer fall through the rest of the chain individually.
    pub async fn resolve_many(
        &self,
        keys: &[K],
        token: CancellationToken,
    ) -> std::collections::HashMap<K, Result<V, CacheError>>
    where
        K: Eq + std::hash::Hash,
    {
        use std::collections::HashMap;

        if keys.is_empty() {
            return HashMap::new();
        }
        if token.is_cancelled() {
            return keys
                .iter()
                .cloned()
                .map(|k| (k, Err(CacheError::cancelled())))
                .collect();
        }

        let Some(Fetcher::Batch(batch_fn)) = self.fetchers.first() else {
            let results = futures::future::join_all(keys.iter().map(|k| self.resolve(k, token.clone()))).await;
            return keys.iter().cloned().zip(results).collect();
        };

        match batch_fn(keys, token.clone()).await {
            Err(err) => keys.iter().cloned().map(|k| (k, Err(err.clone()))).collect(),
            Ok(items) => {
                let mut found: HashMap<K, V> = HashMap::new();
                for item in items {
                    if let Some(value) = item.value {
                        found.insert(item.key, value);
                    }
                }

                let mut out = HashMap::with_capacity(keys.len());
                let mut remaining = Vec::new();
                for key in keys {
                    match found.remove(key) {
                        Some(value) => {
                            out.insert(key.clone(), Ok(value));
                        }
                        None => remaining.push(key.clone()),
                    }
                }

                if !remaining.is_empty() {
                    let fallback =
                        futures::future::join_all(remaining.iter().map(|k| self.resolve_from(1, k, token.clone())))
                            .await;
                    for (key, result) in remaining.into_iter().zip(fallback) {
                        out.insert(key, result);
                    }
                }

                out
            }
        }
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}
