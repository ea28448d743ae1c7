//! `get_many` with a batch-capable head fetcher: the miss set is resolved
//! with a single underlying call, preserving hits already in the store.

use layercache::prelude::*;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let chain: FetcherChain<String, i32> = FetcherChain::builder()
        .then(Fetcher::batch(|keys, _token| {
            let keys = keys.to_vec();
            async move {
                println!("batch fetcher invoked with {keys:?}");
                Ok(keys
                    .into_iter()
                    .map(|k| {
                        let v = k.len() as i32;
                        BatchItem::found(k, v)
                    })
                    .collect())
            }
        }))
        .terminal(TerminalFetcher::new(|_key: &String, _token| async { Ok(-1) }));

    let cache: Cache<String, i32> = Cache::new(chain);
    cache.set("a".to_string(), 0);

    let results = cache
        .get_many(
            vec!["a".to_string(), "bb".to_string(), "ccc".to_string()],
            CancellationToken::new(),
        )
        .await;

    for key in ["a", "bb", "ccc"] {
        println!("{key} -> {:?}", results[key].as_ref().unwrap());
    }
}
