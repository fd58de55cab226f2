//! Bounded fan-out over independent async operations
//!
//! Both helpers poll at most `n` operations at a time on the calling task and
//! return results in input order. Nothing is spawned, so borrowed credentials
//! and contexts can be used inside the operations.

use std::future::Future;

use futures::stream::{self, StreamExt, TryStreamExt};
use log::debug;

/// Run every operation with at most `n` in flight, failing on the first error.
///
/// Once an error is seen, the operations still queued are dropped without
/// being started. `n` of zero is treated as one.
pub async fn gather_with_concurrency<I, Fut, T, E>(n: usize, operations: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, E>>,
{
    let width = n.max(1);
    debug!("Gathering operations with concurrency {}", width);
    stream::iter(operations).buffered(width).try_collect().await
}

/// Run every operation with at most `n` in flight, keeping each outcome
pub async fn gather_settled<I, Fut, T, E>(n: usize, operations: I) -> Vec<Result<T, E>>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, E>>,
{
    let width = n.max(1);
    debug!("Gathering settled operations with concurrency {}", width);
    stream::iter(operations).buffered(width).collect().await
}
