//! "All-of" cancellation aggregator.
//!
//! Combines N caller-supplied [`CancellationToken`]s into one derived token
//! that fires only once every input token currently in the active set has
//! fired. Used to drive the cancellation of a coalesced fetch: the fetch
//! keeps running as long as at least one caller still wants the result.

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Inner {
    active: usize,
    fired: bool,
    watchers: Vec<JoinHandle<()>>,
}

/// Reduces a dynamically growing set of input tokens into one derived token.
///
/// The derived token never fires spuriously: it fires exactly once, only
/// when every token ever added via [`AllOf::add`] has since fired. An
/// aggregator with zero inputs never fires its derived token.
pub struct AllOf {
    derived: CancellationToken,
    inner: Mutex<Inner>,
}

impl AllOf {
    /// Create a new aggregator and its derived token.
    pub fn new() -> (std::sync::Arc<Self>, CancellationToken) {
        let derived = CancellationToken::new();
        let this = std::sync::Arc::new(Self {
            derived: derived.clone(),
            inner: Mutex::new(Inner {
                active: 0,
                fired: false,
                watchers: Vec::new(),
            }),
        });
        (this, derived)
    }

    /// The derived token, fired when the active set becomes empty.
    pub fn derived_token(&self) -> CancellationToken {
        self.derived.clone()
    }

    /// Add a caller token to the active set.
    ///
    /// If `token` is already cancelled this is a no-op (the caller's own
    /// side already observed its cancellation) and returns `false`.
    /// Otherwise the token is tracked and a watcher is spawned to observe
    /// its eventual cancellation; returns `true`.
    pub fn add(self: &std::sync::Arc<Self>, token: CancellationToken) -> bool {
        if token.is_cancelled() {
            return false;
        }

        let mut inner = self.inner.lock();
        if inner.fired {
            // Aggregator already settled; joining now would never fire
            // the derived token's refcount back down, so refuse.
            return false;
        }
        inner.active += 1;

        let this = std::sync::Arc::clone(self);
        let handle = tokio::spawn(async move {
            token.cancelled().await;
            this.on_input_fired();
        });
        inner.watchers.push(handle);
        true
    }

    fn on_input_fired(&self) {
        let mut inner = self.inner.lock();
        // active cannot underflow: each watcher decrements exactly once.
        inner.active -= 1;
        if inner.active == 0 && !inner.fired {
            inner.fired = true;
            self.derived.cancel();
        }
    }

    /// Release all watcher tasks, regardless of whether the derived token
    /// fired. Idempotent. Call once the coalesced request has settled so no
    /// watcher keeps a caller's token subscribed forever.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock();
        for handle in inner.watchers.drain(..) {
            handle.abort();
        }
    }

    /// Number of tokens currently in the active set (test/debug helper).
    pub fn active_count(&self) -> usize {
        self.inner.lock().active
    }
}

impl Drop for AllOf {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn never_fires_with_zero_inputs() {
        let (_agg, derived) = AllOf::new();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!derived.is_cancelled());
    }

    #[tokio::test]
    async fn fires_only_once_all_inputs_fired() {
        let (agg, derived) = AllOf::new();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        assert!(agg.add(a.clone()));
        assert!(agg.add(b.clone()));

        a.cancel();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!derived.is_cancelled(), "one caller cancelling must not fire derived");

        b.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(derived.is_cancelled(), "all callers cancelling must fire derived");
    }

    #[tokio::test]
    async fn already_fired_token_does_not_join() {
        let (agg, _derived) = AllOf::new();
        let pre_fired = CancellationToken::new();
        pre_fired.cancel();
        assert!(!agg.add(pre_fired));
        assert_eq!(agg.active_count(), 0);
    }

    #[tokio::test]
    async fn cleanup_releases_watchers_without_firing() {
        let (agg, derived) = AllOf::new();
        let a = CancellationToken::new();
        agg.add(a.clone());
        agg.cleanup();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!derived.is_cancelled());
        // cleanup is idempotent
        agg.cleanup();
    }
}
