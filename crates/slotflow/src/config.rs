//! Queue configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, require_positive};

/// Env var consulted by `QueueConfig::default()` for the capacity.
pub const CONCURRENCY_ENV: &str = "SLOTFLOW_CONCURRENCY";

const DEFAULT_CAPACITY: usize = 4;
const DEFAULT_LABEL: &str = "queue";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of tasks admitted at once.
    pub capacity: usize,
    /// Name attached to the queue's log events.
    pub label: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: parse_capacity(std::env::var(CONCURRENCY_ENV).ok().as_deref()),
            label: DEFAULT_LABEL.to_string(),
        }
    }
}

impl QueueConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            label: DEFAULT_LABEL.to_string(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_positive("capacity", self.capacity)?;
        Ok(())
    }
}

fn parse_capacity(raw: Option<&str>) -> usize {
    match raw.map(str::trim).map(str::parse::<usize>) {
        Some(Ok(n)) if n > 0 => n,
        Some(_) => {
            tracing::warn!(
                env = CONCURRENCY_ENV,
                value = raw.unwrap_or_default(),
                "Ignoring invalid concurrency override"
            );
            DEFAULT_CAPACITY
        }
        None => DEFAULT_CAPACITY,
    }
}
