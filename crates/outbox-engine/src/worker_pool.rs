//! Bounded-concurrency fan-out over a finite batch.

use futures_util::{stream, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `op` over every item with at most `workers` futures in flight.
///
/// Outputs arrive in completion order, not input order; callers that need
/// to correlate must carry the item identity in the output. Cancelling
/// stops the fan-out and drops futures still in flight, so fewer outputs
/// than items may come back.
pub async fn run_bounded<I, F, Fut>(
    cancel: &CancellationToken,
    items: I,
    workers: usize,
    op: F,
) -> Vec<Fut::Output>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future,
{
    stream::iter(items)
        .map(op)
        .buffer_unordered(workers.max(1))
        .take_until(cancel.cancelled())
        .collect()
        .await
}
