//! Bounded-concurrency execution gate.
//!
//! Producers `submit` tasks through an [`AsyncQueue`] or a cloned
//! [`GateHandle`]; a single consumer drains results with `retrieve`.
//! Admission and result delivery are independent:
//! - `submit` resolves when the task is admitted, not when it finishes
//! - a finished task fills the oldest still-pending result seat
//! - a retrieval frees the worker and admits the oldest queued submission

mod gate;

pub use gate::{Admission, AsyncQueue, GateHandle, GateStats};
