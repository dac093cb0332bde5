//! Stage-to-stage stream fabric.
//!
//! Stages are transducers over bounded, ordered streams: each item is mapped
//! through an async application with at most `fanout` in flight, outputs are
//! flattened back into the stream, and demand propagates upstream through
//! the `buffered` combinator, so a slow consumer throttles every fetch above
//! it. Dropping the downstream end cancels all scheduled work.

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;

/// Pipes every item through `apply` with bounded concurrency, preserving
/// input order and flattening each item's outputs.
pub(crate) fn pipe<T, U, F>(
    input: BoxStream<'static, Result<T>>,
    fanout: usize,
    apply: F,
) -> BoxStream<'static, Result<U>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> BoxFuture<'static, Result<Vec<U>>> + Send + Sync + 'static,
{
    input
        .map(move |item| -> BoxFuture<'static, Result<Vec<U>>> {
            match item {
                Ok(item) => apply(item),
                Err(err) => Box::pin(futures::future::ready(Err(err))),
            }
        })
        .buffered(fanout.max(1))
        .flat_map(|applied| match applied {
            Ok(outputs) => stream::iter(outputs.into_iter().map(Ok)).left_stream(),
            Err(err) => stream::once(futures::future::ready(Err(err))).right_stream(),
        })
        .boxed()
}

/// Terminates the stream after its first error, keeping output emitted
/// before the failure.
pub(crate) fn fuse_on_error<T>(
    input: BoxStream<'static, Result<T>>,
) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
{
    input
        .scan(false, |errored, item| {
            if *errored {
                return futures::future::ready(None);
            }
            *errored = item.is_err();
            futures::future::ready(Some(item))
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn pipe_preserves_order_and_flattens() {
        let input = stream::iter((0u32..4).map(Ok)).boxed();
        let out: Vec<_> = pipe(input, 2, |n| async move { Ok(vec![n * 10, n * 10 + 1]) }.boxed())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec![0, 1, 10, 11, 20, 21, 30, 31]);
    }

    #[tokio::test]
    async fn fused_stream_stops_after_first_error() {
        let input = stream::iter(vec![
            Ok(1),
            Err(Error::reader_msg("boom")),
            Ok(2),
        ])
        .boxed();
        let out: Vec<_> = fuse_on_error(input).collect().await;
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(out[1].is_err());
    }
}
