//! Execution gate: bounded admission plus a FIFO of result seats.
//!
//! A completion is routed to the oldest *pending* seat at the moment it
//! finishes, not to a seat reserved at submission, so results come out in
//! completion order whenever more than one task is in flight.
//!
//! The worker budget is held from admission until a retrieval releases a
//! seat. A consumer that stops retrieving therefore stalls admission, and
//! tasks still running when the queue is dropped finish unobserved.

use std::collections::VecDeque;
use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::config::QueueConfig;
use crate::deferred::Deferred;
use crate::error::{Error, Result};

struct GateState<T> {
    running: usize,
    seats: VecDeque<Deferred<T>>,
    admission: VecDeque<Deferred<()>>,
    next_task: u64,
}

struct Gate<T> {
    capacity: usize,
    label: String,
    state: Mutex<GateState<T>>,
}

/// Point-in-time view of a gate's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub capacity: usize,
    /// Admitted tasks whose seat has not been released yet.
    pub running: usize,
    /// Seats awaiting retrieval, settled or not.
    pub seats: usize,
    /// Seats not yet filled by a completion.
    pub pending_seats: usize,
    /// Submissions waiting for admission.
    pub queued: usize,
}

impl<T: Send + 'static> Gate<T> {
    fn lock(&self) -> MutexGuard<'_, GateState<T>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(queue = %self.label, "Gate mutex poisoned - recovering state");
                poisoned.into_inner()
            }
        }
    }

    fn submit<F, Fut>(self: &Arc<Self>, task: F) -> Admission
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let (task_id, start) = {
            let mut state = self.lock();
            let task_id = state.next_task;
            state.next_task += 1;

            if state.running < self.capacity {
                state.running += 1;
                tracing::trace!(
                    queue = %self.label,
                    task = task_id,
                    running = state.running,
                    capacity = self.capacity,
                    "Task admitted"
                );
                (task_id, None)
            } else {
                let start = Deferred::new();
                state.admission.push_back(start.clone());
                tracing::debug!(
                    queue = %self.label,
                    task = task_id,
                    queued = state.admission.len(),
                    "Gate saturated - task waiting for admission"
                );
                (task_id, Some(start))
            }
        };

        let gate = Arc::clone(self);
        let admitted = start.clone();
        tokio::spawn(async move {
            if let Some(admitted) = admitted {
                admitted.settled().await;
            }
            let outcome = AssertUnwindSafe(async move { task().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(anyhow::anyhow!("task panicked: {}", panic_message(&*panic)))
                });
            gate.deliver(task_id, outcome);
        });

        Admission { start }
    }

    /// Route a finished task's outcome to the oldest pending seat.
    fn deliver(&self, task_id: u64, outcome: anyhow::Result<T>) {
        let mut state = self.lock();
        let pending = state.seats.iter().find(|seat| seat.is_pending()).cloned();
        let seat = match pending {
            Some(seat) => seat,
            None => {
                let seat = Deferred::new();
                state.seats.push_back(seat.clone());
                seat
            }
        };

        match outcome {
            Ok(value) => {
                tracing::trace!(queue = %self.label, task = task_id, "Task completed");
                seat.resolve(value);
            }
            Err(err) => {
                tracing::debug!(queue = %self.label, task = task_id, error = %err, "Task failed");
                seat.reject(Error::from_task(err));
            }
        }
    }

    fn front_seat(&self) -> Deferred<T> {
        let mut state = self.lock();
        if let Some(seat) = state.seats.front().cloned() {
            return seat;
        }
        let seat = Deferred::new();
        state.seats.push_back(seat.clone());
        seat
    }

    /// Drop the front seat and hand its worker to the next queued submission.
    fn release(&self) {
        let mut state = self.lock();
        state.seats.pop_front();
        debug_assert!(state.running > 0, "released a seat with no running task");
        state.running -= 1;

        if state.running < self.capacity
            && let Some(start) = state.admission.pop_front()
        {
            state.running += 1;
            tracing::trace!(
                queue = %self.label,
                running = state.running,
                queued = state.admission.len(),
                "Seat released - admitting queued task"
            );
            start.resolve(());
        }
    }

    fn stats(&self) -> GateStats {
        let state = self.lock();
        GateStats {
            capacity: self.capacity,
            running: state.running,
            seats: state.seats.len(),
            pending_seats: state.seats.iter().filter(|s| s.is_pending()).count(),
            queued: state.admission.len(),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Resolves once a submitted task has been admitted to run.
///
/// The task is scheduled regardless of whether this is awaited.
pub struct Admission {
    start: Option<Deferred<()>>,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        self.start.as_ref().is_none_or(|start| !start.is_pending())
    }
}

impl IntoFuture for Admission {
    type Output = ();
    type IntoFuture = BoxFuture<'static, ()>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            if let Some(start) = self.start {
                start.settled().await;
            }
        })
    }
}

/// Bounded-concurrency task queue with a single consumer.
///
/// `retrieve` takes `&mut self`: seats are drained by exactly one consumer.
/// Use [`AsyncQueue::handle`] to submit from other tasks.
pub struct AsyncQueue<T: Send + 'static> {
    gate: Arc<Gate<T>>,
}

impl<T: Send + 'static> AsyncQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_config(&QueueConfig::new(capacity))
    }

    pub fn with_config(config: &QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            gate: Arc::new(Gate {
                capacity: config.capacity,
                label: config.label.clone(),
                state: Mutex::new(GateState {
                    running: 0,
                    seats: VecDeque::new(),
                    admission: VecDeque::new(),
                    next_task: 0,
                }),
            }),
        })
    }

    /// Submit a task; see [`GateHandle::submit`].
    pub fn submit<F, Fut>(&self, task: F) -> Admission
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.gate.submit(task)
    }

    /// Wait for the next result in seat order.
    ///
    /// Each call yields exactly one task's outcome. If this future is dropped
    /// before it completes, the seat stays at the front and the next call
    /// waits on it again.
    pub async fn retrieve(&mut self) -> Result<T> {
        let seat = self.gate.front_seat();
        let outcome = seat.wait().await;
        self.gate.release();
        outcome
    }

    pub fn handle(&self) -> GateHandle<T> {
        GateHandle {
            gate: Arc::clone(&self.gate),
        }
    }

    pub fn capacity(&self) -> usize {
        self.gate.capacity
    }

    pub fn stats(&self) -> GateStats {
        self.gate.stats()
    }
}

impl<T: Send + 'static> Drop for AsyncQueue<T> {
    fn drop(&mut self) {
        let stats = self.gate.stats();
        if stats.running > 0 || stats.queued > 0 {
            tracing::warn!(
                queue = %self.gate.label,
                running = stats.running,
                queued = stats.queued,
                "Queue dropped with unretrieved work - results will be discarded"
            );
        }
    }
}

/// Submit-only handle to an [`AsyncQueue`].
pub struct GateHandle<T: Send + 'static> {
    gate: Arc<Gate<T>>,
}

impl<T: Send + 'static> Clone for GateHandle<T> {
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<T: Send + 'static> GateHandle<T> {
    /// Submit a task for execution.
    ///
    /// Admitted immediately if fewer than `capacity` tasks hold a worker,
    /// otherwise queued behind earlier blocked submissions. The returned
    /// [`Admission`] resolves once the task starts, not when it finishes.
    pub fn submit<F, Fut>(&self, task: F) -> Admission
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.gate.submit(task)
    }

    pub fn stats(&self) -> GateStats {
        self.gate.stats()
    }
}
