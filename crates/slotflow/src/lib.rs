//! slotflow: bounded-concurrency execution gate and lazy async sequences.
//!
//! - [`AsyncQueue`] admits at most `capacity` tasks at once and hands results
//!   back through a FIFO of seats, in completion order.
//! - [`AsyncStream`] is a pull-based sequence with `map`, `flat_map`,
//!   `sliding` and the gate-backed `parallel_map`.
//!
//! Everything runs on tokio. There is no cancellation: work admitted to a
//! gate runs to completion even if nobody retrieves its result.

mod config;
mod deferred;
mod error;
pub mod queue;
pub mod stream;
pub mod telemetry;

pub use config::{CONCURRENCY_ENV, QueueConfig};
pub use deferred::Deferred;
pub use error::{Error, Result};
pub use queue::{Admission, AsyncQueue, GateHandle, GateStats};
pub use stream::{AsyncStream, IterSource, Source};
