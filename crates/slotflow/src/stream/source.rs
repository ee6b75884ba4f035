//! Pull sources backing an [`AsyncStream`](super::AsyncStream).

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::error::Result;

/// Something that can be asked for its next value.
///
/// `Ok(None)` marks the end. Callers go through `AsyncStream`, which stops
/// pulling after the end or an error, so implementations need not be fused.
#[async_trait]
pub trait Source<T>: Send {
    async fn pull(&mut self) -> Result<Option<T>>;
}

/// Source over an in-memory iterator.
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I> {
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

#[async_trait]
impl<I> Source<I::Item> for IterSource<I>
where
    I: Iterator + Send,
    I::Item: Send,
{
    async fn pull(&mut self) -> Result<Option<I::Item>> {
        Ok(self.iter.next())
    }
}

/// Source over a boxed `futures` stream of fallible items.
pub(crate) struct StreamSource<T> {
    stream: BoxStream<'static, Result<T>>,
}

impl<T> StreamSource<T> {
    pub(crate) fn new(stream: BoxStream<'static, Result<T>>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<T: Send> Source<T> for StreamSource<T> {
    async fn pull(&mut self) -> Result<Option<T>> {
        self.stream.next().await.transpose()
    }
}
