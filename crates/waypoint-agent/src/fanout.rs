use std::future::Future;

use futures::future::join_all;
use tracing::debug;

/// A result paired with the key of the input that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Attributed<K, T> {
    pub key: K,
    pub value: T,
}

/// Run `f` over every payload concurrently and wait for all of them.
///
/// Results come back in input order, each carrying its own key, regardless
/// of the order in which the futures complete. Every call gets its own
/// payload; nothing is shared between them unless `f` captures it.
pub async fn fan_out<K, P, F, Fut>(
    items: impl IntoIterator<Item = (K, P)>,
    f: F,
) -> Vec<Attributed<K, Fut::Output>>
where
    F: Fn(P) -> Fut,
    Fut: Future,
{
    let (keys, futures): (Vec<K>, Vec<Fut>) =
        items.into_iter().map(|(key, payload)| (key, f(payload))).unzip();

    debug!(count = futures.len(), "Fanning out");

    join_all(futures)
        .await
        .into_iter()
        .zip(keys)
        .map(|(value, key)| Attributed { key, value })
        .collect()
}
