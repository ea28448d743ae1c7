//! Error taxonomy for cache operations

use thiserror::Error;

/// Errors a caller of the cache facade can observe.
///
/// `Clone` so a single settlement can be broadcast, unmodified, to every
/// caller currently attached to the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// The caller's own token was already cancelled, or fired before the
    /// value became available and no other caller kept the fetch alive.
    #[error("request cancelled{}", cause.as_ref().map(|c| format!(": {c}")).unwrap_or_default())]
    Cancelled {
        /// Optional human-readable cancellation reason, if the token carried one.
        cause: Option<String>,
    },

    /// Every fetcher in the chain returned `None` for the key.
    #[error("no fetcher produced a value for this key")]
    NoFetcherProduced,

    /// A fetcher raised an error; the entry has been purged from the store.
    #[error("fetcher failed: {source}")]
    FetcherFailed {
        /// String rendering of the underlying fetcher error.
        source: String,
    },

    /// Internal invariant violation (leader task panicked or was dropped
    /// without settling the broadcast channel).
    #[error("internal cache error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Build a `Cancelled` error without a reason.
    pub fn cancelled() -> Self {
        CacheError::Cancelled { cause: None }
    }

    /// Build a `Cancelled` error carrying a reason string.
    pub fn cancelled_because(cause: impl Into<String>) -> Self {
        CacheError::Cancelled {
            cause: Some(cause.into()),
        }
    }

    /// True if this is a cancellation, as opposed to a real fetch failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled { .. })
    }
}

/// Result type alias used throughout layercache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_display() {
        let err = CacheError::cancelled();
        assert_eq!(err.to_string(), "request cancelled");

        let err = CacheError::cancelled_because("caller abort");
        assert_eq!(err.to_string(), "request cancelled: caller abort");
    }

    #[test]
    fn test_is_cancelled() {
        assert!(CacheError::cancelled().is_cancelled());
        assert!(!CacheError::NoFetcherProduced.is_cancelled());
    }

    #[test]
    fn test_fetcher_failed_display() {
        let err = CacheError::FetcherFailed {
            source: "timeout".into(),
        };
        assert_eq!(err.to_string(), "fetcher failed: timeout");
    }
}
