//! Smallest possible cache: one terminal fetcher, default config.

use layercache::prelude::*;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let chain = FetcherChain::single_source(TerminalFetcher::new(|key: &String, _token| {
        let key = key.clone();
        async move {
            println!("fetching {key}");
            Ok(key.len() as i32)
        }
    }));

    let cache: Cache<String, i32> = Cache::new(chain);

    let first = cache.get("hello".to_string(), CancellationToken::new()).await.unwrap();
    println!("first call: {first}");

    // Second call hits the store, the fetcher does not run again.
    let second = cache.get("hello".to_string(), CancellationToken::new()).await.unwrap();
    println!("second call (cached): {second}");
}
