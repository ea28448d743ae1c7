//! Two concurrent callers for the same key collapse into one fetch; the
//! fetch keeps running until both callers' tokens have fired.

use layercache::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let chain = FetcherChain::single_source(TerminalFetcher::new(|_key: &String, token| async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(42),
            _ = token.cancelled() => {
                println!("fetcher observed cancellation, abandoning work");
                Err(CacheError::cancelled())
            }
        }
    }));

    let cache = Arc::new(Cache::new(chain));

    let token_a = CancellationToken::new();
    let token_b = CancellationToken::new();

    let cache_a = cache.clone();
    let a = tokio::spawn({
        let token_a = token_a.clone();
        async move { cache_a.get("x".to_string(), token_a).await }
    });
    let cache_b = cache.clone();
    let b = tokio::spawn({
        let token_b = token_b.clone();
        async move { cache_b.get("x".to_string(), token_b).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    token_a.cancel();
    println!("caller A cancelled; fetch should still be running for caller B");

    tokio::time::sleep(Duration::from_millis(50)).await;
    token_b.cancel();
    println!("caller B cancelled; the shared fetch is now cancelled");

    let (result_a, result_b) = tokio::join!(a, b);
    println!("A: {:?}", result_a.unwrap());
    println!("B: {:?}", result_b.unwrap());
}
