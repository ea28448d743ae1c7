//! "Any-of" cancellation — dual of [`super::AllOf`].

use tokio_util::sync::CancellationToken;

/// Derive a token that fires as soon as any one of `tokens` fires.
///
/// Exposed for fetcher authors who want to race the cache's derived
/// cancellation token against an ad-hoc, fetcher-local cancellation source
/// (e.g. a per-call deadline). The cache's own facade never needs this —
/// it only ever reduces with [`super::AllOf`].
pub struct AnyOf;

impl AnyOf {
    /// Build the combined token. Returns an already-cancelled token
    /// immediately if any input already fired.
    pub fn of(tokens: impl IntoIterator<Item = CancellationToken>) -> CancellationToken {
        let combined = CancellationToken::new();
        let mut any = false;
        let mut handles = Vec::new();

        for token in tokens {
            if token.is_cancelled() {
                any = true;
                continue;
            }
            let combined = combined.clone();
            handles.push(tokio::spawn(async move {
                token.cancelled().await;
                combined.cancel();
            }));
        }

        if any {
            combined.cancel();
            for handle in handles {
                handle.abort();
            }
        }

        combined
    }
}
