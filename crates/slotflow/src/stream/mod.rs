//! Lazy asynchronous sequences.
//!
//! An [`AsyncStream`] owns one pull [`Source`]. Every transform consumes the
//! stream and wraps its source in a new one, so a source only ever has one
//! consumer. The stream is fused: once a pull returns the end marker or an
//! error, later `next()` calls return `Ok(None)` without touching the source.

mod combinators;
mod parallel;
mod source;

use std::future::Future;
use std::sync::Arc;

use futures::stream::{BoxStream, Stream};
use futures::{StreamExt, TryStreamExt};

use crate::config::QueueConfig;
use crate::error::{Error, Result, require_positive};
use crate::queue::AsyncQueue;

use combinators::{FlatMapSource, MapSource, SlidingSource};
use parallel::GatedSource;
use source::StreamSource;
pub use source::{IterSource, Source};

pub struct AsyncStream<T> {
    source: Box<dyn Source<T>>,
    finished: bool,
}

impl<T: Send + 'static> AsyncStream<T> {
    pub fn from_source<S: Source<T> + 'static>(source: S) -> Self {
        Self {
            source: Box::new(source),
            finished: false,
        }
    }

    /// Stream over the items of an in-memory collection or iterator.
    pub fn iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_source(IterSource::new(items.into_iter()))
    }

    /// Wrap an infallible `futures` stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self::from_source(StreamSource::new(stream.map(Ok).boxed()))
    }

    pub fn empty() -> Self {
        Self::iter(Vec::new())
    }

    /// Pull the next value. `Ok(None)` marks the end and repeats forever.
    ///
    /// After an error the stream is finished as well; a failed pull cannot be
    /// retried.
    pub async fn next(&mut self) -> Result<Option<T>> {
        if self.finished {
            return Ok(None);
        }
        let pulled = self.source.pull().await;
        if !matches!(pulled, Ok(Some(_))) {
            self.finished = true;
        }
        pulled
    }

    /// Apply `f(value, index)` to each value, one at a time, in order.
    pub fn map<O, F, Fut>(self, f: F) -> AsyncStream<O>
    where
        O: Send + 'static,
        F: FnMut(T, usize) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        AsyncStream::from_source(MapSource::new(self, f))
    }

    /// Apply `f` with up to `concurrency` invocations in flight.
    ///
    /// Values come out in completion order whenever more than one invocation
    /// is running; with `concurrency == 1` source order is kept. Use
    /// [`parallel_map_ordered`](Self::parallel_map_ordered) when order
    /// matters.
    ///
    /// Invocations already admitted keep running if the returned stream is
    /// dropped or fails; their results are discarded.
    pub fn parallel_map<O, F, Fut>(self, concurrency: usize, f: F) -> Result<AsyncStream<O>>
    where
        O: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let config = QueueConfig::new(concurrency).with_label("parallel_map");
        self.parallel_map_with(&config, f)
    }

    /// [`parallel_map`](Self::parallel_map) with an explicit queue config.
    pub fn parallel_map_with<O, F, Fut>(self, config: &QueueConfig, f: F) -> Result<AsyncStream<O>>
    where
        O: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let queue = AsyncQueue::with_config(config)?;
        Ok(AsyncStream::from_source(GatedSource::new(self, f, queue)))
    }

    /// Like [`parallel_map`](Self::parallel_map) but emits in source order.
    ///
    /// At most `concurrency` invocations are polled at once; a slow value
    /// holds back the ones after it.
    pub fn parallel_map_ordered<O, F, Fut>(
        self,
        concurrency: usize,
        f: F,
    ) -> Result<AsyncStream<O>>
    where
        O: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let concurrency = require_positive("concurrency", concurrency)?;
        let f = Arc::new(f);
        let mapped = self
            .into_stream()
            .map(move |pulled| {
                let f = Arc::clone(&f);
                async move { f(pulled?).await.map_err(Error::from_task) }
            })
            .buffered(concurrency)
            .boxed();
        Ok(AsyncStream::from_source(StreamSource::new(mapped)))
    }

    /// Expand each value into zero or more values, flattened in order.
    pub fn flat_map<O, I, F>(self, f: F) -> AsyncStream<O>
    where
        O: Send + 'static,
        F: FnMut(T, usize) -> I + Send + 'static,
        I: Into<AsyncStream<O>> + 'static,
    {
        AsyncStream::from_source(FlatMapSource::new(self, f))
    }

    /// Group values into chunks of `size`; the last chunk may be shorter.
    pub fn sliding(self, size: usize) -> Result<AsyncStream<Vec<T>>> {
        let size = require_positive("size", size)?;
        Ok(AsyncStream::from_source(SlidingSource::new(self, size)))
    }

    /// Drain every value into a `Vec`. Never returns for an infinite source.
    pub async fn to_vec(mut self) -> Result<Vec<T>> {
        let mut values = Vec::new();
        while let Some(value) = self.next().await? {
            values.push(value);
        }
        Ok(values)
    }

    /// Expose the sequence as a `futures` stream of fallible items.
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        futures::stream::unfold(self, |mut stream| async move {
            match stream.next().await {
                Ok(Some(value)) => Some((Ok(value), stream)),
                Ok(None) => None,
                Err(err) => Some((Err(err), stream)),
            }
        })
        .boxed()
    }

    /// Drain the sequence with `f`, stopping at the first error.
    pub async fn try_for_each<F, Fut>(self, f: F) -> Result<()>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.into_stream().try_for_each(f).await
    }
}

impl<T: Send + 'static> From<Vec<T>> for AsyncStream<T> {
    fn from(values: Vec<T>) -> Self {
        Self::iter(values)
    }
}

impl<T: Send + 'static> FromIterator<T> for AsyncStream<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::iter(iter.into_iter().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time::sleep;

    fn numbers(n: u32) -> AsyncStream<u32> {
        (1..=n).collect()
    }

    /// Source that never ends.
    struct Counter(u64);

    #[async_trait::async_trait]
    impl Source<u64> for Counter {
        async fn pull(&mut self) -> Result<Option<u64>> {
            self.0 += 1;
            Ok(Some(self.0))
        }
    }

    /// Source yielding `ok` values and then failing.
    struct FailsAfter {
        ok: u32,
        pulled: u32,
    }

    #[async_trait::async_trait]
    impl Source<u32> for FailsAfter {
        async fn pull(&mut self) -> Result<Option<u32>> {
            if self.pulled == self.ok {
                return Err(Error::TaskFailure(anyhow::anyhow!("disk read failed")));
            }
            self.pulled += 1;
            Ok(Some(self.pulled))
        }
    }

    #[tokio::test]
    async fn yields_collection_in_order_then_ends() {
        let mut stream = AsyncStream::from(vec!["a", "b"]);
        assert_eq!(stream.next().await.unwrap(), Some("a"));
        assert_eq!(stream.next().await.unwrap(), Some("b"));
        for _ in 0..3 {
            assert_eq!(stream.next().await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn empty_drains_to_empty_vec() {
        let values = AsyncStream::<u8>::empty().to_vec().await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn map_preserves_order_and_count() {
        let doubled = numbers(3)
            .map(|x, _| async move { Ok(x * 2) })
            .to_vec()
            .await
            .unwrap();
        assert_eq!(doubled, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn map_passes_pull_index() {
        let indexed = AsyncStream::from(vec!["x", "y", "z"])
            .map(|s, i| async move { Ok(format!("{i}:{s}")) })
            .to_vec()
            .await
            .unwrap();
        assert_eq!(indexed, vec!["0:x", "1:y", "2:z"]);
    }

    #[tokio::test]
    async fn map_is_lazy_over_infinite_source() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut stream = AsyncStream::from_source(Counter(0)).map(move |x, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move { Ok(x * 10) }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(stream.next().await.unwrap(), Some(10));
        assert_eq!(stream.next().await.unwrap(), Some(20));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn map_failure_surfaces_and_fuses() {
        let mut stream = numbers(4).map(|x, _| async move {
            if x == 2 {
                anyhow::bail!("cannot map {x}");
            }
            Ok(x)
        });

        assert_eq!(stream.next().await.unwrap(), Some(1));
        let err = stream.next().await.unwrap_err();
        assert!(err.is_task_failure());
        assert_eq!(err.to_string(), "task failed: cannot map 2");
        assert_eq!(stream.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn flat_map_flattens_in_order() {
        let values = numbers(2)
            .flat_map(|x, _| vec![x, x])
            .to_vec()
            .await
            .unwrap();
        assert_eq!(values, vec![1, 1, 2, 2]);
    }

    #[tokio::test]
    async fn flat_map_accepts_nested_streams_and_empty_expansions() {
        let values = numbers(4)
            .flat_map(|x, i| {
                if i % 2 == 0 {
                    AsyncStream::empty()
                } else {
                    numbers(x)
                }
            })
            .to_vec()
            .await
            .unwrap();
        assert_eq!(values, vec![1, 2, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn sliding_emits_trailing_short_chunk() {
        let chunks = numbers(5).sliding(2).unwrap().to_vec().await.unwrap();
        assert_eq!(chunks, vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[tokio::test]
    async fn sliding_without_remainder_has_no_empty_chunk() {
        let chunks = numbers(4).sliding(2).unwrap().to_vec().await.unwrap();
        assert_eq!(chunks, vec![vec![1, 2], vec![3, 4]]);
    }

    #[tokio::test]
    async fn sliding_over_empty_source_is_empty() {
        let chunks = AsyncStream::<u32>::empty()
            .sliding(3)
            .unwrap()
            .to_vec()
            .await
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn zero_sizes_are_invalid() {
        assert!(numbers(3).sliding(0).err().unwrap().is_invalid_argument());
        assert!(
            numbers(3)
                .parallel_map(0, |x| async move { Ok(x) })
                .err()
                .unwrap()
                .is_invalid_argument()
        );
        assert!(
            numbers(3)
                .parallel_map_ordered(0, |x| async move { Ok(x) })
                .err()
                .unwrap()
                .is_invalid_argument()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_map_emits_in_completion_order() {
        let values = AsyncStream::from(vec![30u64, 10, 20])
            .parallel_map(3, |ms| async move {
                sleep(Duration::from_millis(ms)).await;
                Ok(ms)
            })
            .unwrap()
            .to_vec()
            .await
            .unwrap();
        assert_eq!(values, vec![10, 20, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_map_sentinel_does_not_cut_off_slow_values() {
        // The sentinel is admitted as soon as the first value is retrieved and
        // completes before the two slower values.
        let values = AsyncStream::from(vec![5u64, 40, 80])
            .parallel_map(3, |ms| async move {
                sleep(Duration::from_millis(ms)).await;
                Ok(ms)
            })
            .unwrap()
            .to_vec()
            .await
            .unwrap();
        assert_eq!(values, vec![5, 40, 80]);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_map_with_one_worker_keeps_source_order() {
        let values = AsyncStream::from(vec![30u64, 10, 20, 5])
            .parallel_map(1, |ms| async move {
                sleep(Duration::from_millis(ms)).await;
                Ok(ms)
            })
            .unwrap()
            .to_vec()
            .await
            .unwrap();
        assert_eq!(values, vec![30, 10, 20, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_map_bounds_in_flight_invocations() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let mut values = numbers(20)
            .parallel_map(4, move |x| {
                let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(u64::from(x % 3) + 1)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(x)
                }
            })
            .unwrap()
            .to_vec()
            .await
            .unwrap();

        values.sort_unstable();
        assert_eq!(values, (1..=20).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_map_task_failure_stops_consumer() {
        let mut stream = numbers(6)
            .parallel_map(2, |x| async move {
                sleep(Duration::from_millis(u64::from(x))).await;
                if x == 3 {
                    anyhow::bail!("item {x} rejected");
                }
                Ok(x)
            })
            .unwrap();

        let mut delivered = Vec::new();
        let err = loop {
            match stream.next().await {
                Ok(Some(value)) => delivered.push(value),
                Ok(None) => panic!("stream ended without surfacing the failure"),
                Err(err) => break err,
            }
        };

        assert!(err.is_task_failure());
        assert!(err.to_string().contains("item 3 rejected"));
        assert_eq!(delivered, vec![1, 2]);
        assert_eq!(stream.next().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_map_failure_fails_to_vec() {
        let err = numbers(5)
            .parallel_map(3, |x| async move {
                if x == 4 {
                    anyhow::bail!("bad input");
                }
                Ok(x)
            })
            .unwrap()
            .to_vec()
            .await
            .unwrap_err();
        assert!(err.is_task_failure());
    }

    #[tokio::test]
    async fn parallel_map_forwards_upstream_errors() {
        let err = AsyncStream::from_source(FailsAfter { ok: 2, pulled: 0 })
            .parallel_map(2, |x| async move { Ok(x) })
            .unwrap()
            .to_vec()
            .await
            .unwrap_err();
        assert!(err.is_task_failure());
        assert!(err.to_string().contains("disk read failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_map_pulls_infinite_source_lazily() {
        let mut stream = AsyncStream::from_source(Counter(0))
            .parallel_map(2, |x| async move { Ok(x) })
            .unwrap();

        let mut first = Vec::new();
        for _ in 0..5 {
            first.push(stream.next().await.unwrap().unwrap());
        }
        first.sort_unstable();
        first.dedup();
        assert_eq!(first.len(), 5);
        // Only values that were admitted can have been delivered.
        assert!(first.iter().all(|&x| x <= 6));
    }

    #[tokio::test]
    async fn parallel_map_over_empty_source_ends() {
        let values = AsyncStream::<u32>::empty()
            .parallel_map(4, |x| async move { Ok(x) })
            .unwrap()
            .to_vec()
            .await
            .unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_map_ordered_keeps_source_order() {
        let values = AsyncStream::from(vec![30u64, 10, 20])
            .parallel_map_ordered(3, |ms| async move {
                sleep(Duration::from_millis(ms)).await;
                Ok(ms)
            })
            .unwrap()
            .to_vec()
            .await
            .unwrap();
        assert_eq!(values, vec![30, 10, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_map_ordered_runs_concurrently() {
        let started = tokio::time::Instant::now();
        let values = numbers(4)
            .parallel_map_ordered(4, |x| async move {
                sleep(Duration::from_millis(100)).await;
                Ok(x)
            })
            .unwrap()
            .to_vec()
            .await
            .unwrap();
        assert_eq!(values, vec![1, 2, 3, 4]);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn chained_transforms_compose() {
        let values = numbers(6)
            .map(|x, _| async move { Ok(x + 1) })
            .flat_map(|x, _| vec![x; 2])
            .sliding(4)
            .unwrap()
            .to_vec()
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![
                vec![2, 2, 3, 3],
                vec![4, 4, 5, 5],
                vec![6, 6, 7, 7],
            ]
        );
    }

    #[tokio::test]
    async fn from_stream_and_into_stream_interop() {
        let stream = AsyncStream::from_stream(futures::stream::iter(vec![1, 2, 3]));
        let collected: Vec<u32> = stream
            .map(|x, _| async move { Ok(x * 3) })
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(collected, vec![3, 6, 9]);
    }

    #[tokio::test]
    async fn into_stream_ends_after_first_error() {
        let results: Vec<Result<u32>> = AsyncStream::from_source(FailsAfter { ok: 1, pulled: 0 })
            .into_stream()
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn try_for_each_visits_every_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        numbers(3)
            .try_for_each(move |x| {
                sink.lock().unwrap().push(x);
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }
}
