//! Sequential transforms: one upstream value in flight at a time.

use std::future::Future;

use async_trait::async_trait;

use super::AsyncStream;
use super::source::Source;
use crate::error::{Error, Result};

pub(crate) struct MapSource<T, F> {
    upstream: AsyncStream<T>,
    f: F,
    index: usize,
}

impl<T, F> MapSource<T, F> {
    pub(crate) fn new(upstream: AsyncStream<T>, f: F) -> Self {
        Self {
            upstream,
            f,
            index: 0,
        }
    }
}

#[async_trait]
impl<T, O, F, Fut> Source<O> for MapSource<T, F>
where
    T: Send + 'static,
    O: Send + 'static,
    F: FnMut(T, usize) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
{
    async fn pull(&mut self) -> Result<Option<O>> {
        let Some(value) = self.upstream.next().await? else {
            return Ok(None);
        };
        let index = self.index;
        self.index += 1;
        (self.f)(value, index)
            .await
            .map(Some)
            .map_err(Error::from_task)
    }
}

pub(crate) struct FlatMapSource<T, O, F> {
    upstream: AsyncStream<T>,
    f: F,
    index: usize,
    inner: Option<AsyncStream<O>>,
}

impl<T, O, F> FlatMapSource<T, O, F> {
    pub(crate) fn new(upstream: AsyncStream<T>, f: F) -> Self {
        Self {
            upstream,
            f,
            index: 0,
            inner: None,
        }
    }
}

#[async_trait]
impl<T, O, F, I> Source<O> for FlatMapSource<T, O, F>
where
    T: Send + 'static,
    O: Send + 'static,
    F: FnMut(T, usize) -> I + Send + 'static,
    I: Into<AsyncStream<O>> + 'static,
{
    async fn pull(&mut self) -> Result<Option<O>> {
        loop {
            if let Some(inner) = self.inner.as_mut() {
                if let Some(value) = inner.next().await? {
                    return Ok(Some(value));
                }
                self.inner = None;
            }

            let Some(value) = self.upstream.next().await? else {
                return Ok(None);
            };
            let index = self.index;
            self.index += 1;
            self.inner = Some((self.f)(value, index).into());
        }
    }
}

pub(crate) struct SlidingSource<T> {
    upstream: AsyncStream<T>,
    size: usize,
    chunk: Vec<T>,
}

impl<T> SlidingSource<T> {
    pub(crate) fn new(upstream: AsyncStream<T>, size: usize) -> Self {
        Self {
            upstream,
            size,
            chunk: Vec::with_capacity(size),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Source<Vec<T>> for SlidingSource<T> {
    async fn pull(&mut self) -> Result<Option<Vec<T>>> {
        while let Some(value) = self.upstream.next().await? {
            self.chunk.push(value);
            if self.chunk.len() == self.size {
                let full = std::mem::replace(&mut self.chunk, Vec::with_capacity(self.size));
                return Ok(Some(full));
            }
        }

        if self.chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some(std::mem::take(&mut self.chunk)))
        }
    }
}
