//! Bounded concurrent fan-out over a claimed batch.

use std::future::Future;

use futures::stream::{self, StreamExt};

/// Runs `f` over every item with at most `limit` calls in flight and
/// collects every result.
///
/// Each item's outcome is independent: one failure never cancels the
/// others. Results come back in completion order, so callers pair each
/// result with its item. A `limit` of zero is treated as one.
pub async fn fan_out<I, F, Fut, R>(items: I, limit: usize, f: F) -> Vec<R>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(items).map(f).buffer_unordered(limit.max(1)).collect().await
}
