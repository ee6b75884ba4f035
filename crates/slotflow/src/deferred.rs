//! Deferred - a settle-once result cell with a visible pending flag.
//!
//! Producers settle it through `resolve`/`reject` on any clone of the handle;
//! any number of waiters can await `settled()`. The outcome itself is taken
//! exactly once by whoever owns the consuming side.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::{Error, Result};

struct Inner<T> {
    pending: AtomicBool,
    outcome: Mutex<Option<Result<T>>>,
    settled: Notify,
}

/// Handle to one eventual value.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl<T> Deferred<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: AtomicBool::new(true),
                outcome: Mutex::new(None),
                settled: Notify::new(),
            }),
        }
    }

    /// True until the first `resolve`/`reject`.
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Settle with a value. Returns `false` if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn reject(&self, error: Error) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Result<T>) -> bool {
        {
            let mut slot = self.lock_outcome();
            if !self.is_pending() {
                return false;
            }
            *slot = Some(outcome);
            // Flipped under the outcome lock so a waiter that sees
            // `pending == false` always finds the value in place.
            self.inner.pending.store(false, Ordering::Release);
        }
        self.inner.settled.notify_waiters();
        true
    }

    /// Wait until the deferred has settled. Does not consume the outcome.
    pub async fn settled(&self) {
        loop {
            let mut notified = pin!(self.inner.settled.notified());
            notified.as_mut().enable();
            if !self.is_pending() {
                return;
            }
            notified.await;
        }
    }

    /// Take the outcome, if settled and not yet taken.
    pub fn take(&self) -> Option<Result<T>> {
        self.lock_outcome().take()
    }

    /// Wait for settlement and take the outcome.
    pub async fn wait(&self) -> Result<T> {
        self.settled().await;
        self.take().ok_or(Error::SeatConsumed)?
    }

    fn lock_outcome(&self) -> MutexGuard<'_, Option<Result<T>>> {
        // The lock is never held across user code, so a poisoned guard still
        // protects a coherent value.
        self.inner
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
