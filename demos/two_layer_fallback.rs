//! A primary fetcher that sometimes has no answer, falling back to a
//! terminal fetcher that always does.

use layercache::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let hot_keys: Arc<HashMap<&'static str, i32>> = Arc::new(HashMap::from([("a", 1), ("b", 2)]));

    let chain: FetcherChain<String, i32> = FetcherChain::builder()
        .then(Fetcher::single(move |key, _token| {
            let hot_keys = Arc::clone(&hot_keys);
            let key = key.clone();
            async move { Ok(hot_keys.get(key.as_str()).copied()) }
        }))
        .terminal(TerminalFetcher::new(|key: &String, _token| {
            let key = key.clone();
            async move {
                println!("falling back to cold-path computation for {key}");
                Ok(-1)
            }
        }));

    let cache: Cache<String, i32> = Cache::new(chain);

    println!("a -> {}", cache.get("a".to_string(), CancellationToken::new()).await.unwrap());
    println!("z -> {}", cache.get("z".to_string(), CancellationToken::new()).await.unwrap());
}
