//! Gate-backed parallel mapping.
//!
//! A driver task pulls upstream and submits one task per value, waiting only
//! for admission. After upstream ends it submits a `Step::Done` sentinel
//! carrying the number of values submitted. Results are delivered in
//! completion order, so the instant sentinel can overtake slower values that
//! are still in flight; the consumer keeps retrieving until it has delivered
//! that many values.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::AsyncStream;
use super::source::Source;
use crate::error::Result;
use crate::queue::{AsyncQueue, GateHandle};

/// What a `parallel_map` task hands back through the gate.
pub(crate) enum Step<T> {
    Item(T),
    /// Upstream is exhausted after this many submitted values.
    Done(usize),
}

pub(crate) struct GatedSource<T, O: Send + 'static, F> {
    /// Taken on first pull, when the driver is spawned.
    driver: Option<(AsyncStream<T>, F)>,
    queue: AsyncQueue<Step<O>>,
    delivered: usize,
    expected: Option<usize>,
}

impl<T, O: Send + 'static, F> GatedSource<T, O, F> {
    pub(crate) fn new(upstream: AsyncStream<T>, f: F, queue: AsyncQueue<Step<O>>) -> Self {
        Self {
            driver: Some((upstream, f)),
            queue,
            delivered: 0,
            expected: None,
        }
    }
}

#[async_trait]
impl<T, O, F, Fut> Source<O> for GatedSource<T, O, F>
where
    T: Send + 'static,
    O: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
{
    async fn pull(&mut self) -> Result<Option<O>> {
        if let Some((upstream, f)) = self.driver.take() {
            tokio::spawn(drive(upstream, Arc::new(f), self.queue.handle()));
        }

        loop {
            if let Some(expected) = self.expected
                && self.delivered >= expected
            {
                return Ok(None);
            }

            match self.queue.retrieve().await? {
                Step::Item(value) => {
                    self.delivered += 1;
                    return Ok(Some(value));
                }
                Step::Done(submitted) => {
                    tracing::trace!(
                        submitted,
                        delivered = self.delivered,
                        "Upstream exhausted"
                    );
                    self.expected = Some(submitted);
                }
            }
        }
    }
}

async fn drive<T, O, F, Fut>(mut upstream: AsyncStream<T>, f: Arc<F>, gate: GateHandle<Step<O>>)
where
    T: Send + 'static,
    O: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
{
    let mut submitted = 0;
    loop {
        match upstream.next().await {
            Ok(Some(value)) => {
                submitted += 1;
                let f = Arc::clone(&f);
                gate.submit(move || async move { f(value).await.map(Step::Item) })
                    .await;
            }
            Ok(None) => break,
            Err(err) => {
                // Delivered through a seat so the consumer sees it in place of
                // the sentinel.
                tracing::debug!(error = %err, "Upstream failed - forwarding to consumer");
                gate.submit(move || async move { Err(anyhow::Error::from(err)) })
                    .await;
                return;
            }
        }
    }

    gate.submit(move || async move { Ok(Step::Done(submitted)) })
        .await;
}
