use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A submitted task or transform closure returned an error or panicked.
    #[error("task failed: {0:#}")]
    TaskFailure(anyhow::Error),

    #[error("invalid argument: {name} must be a positive integer, got {value}")]
    InvalidArgument { name: &'static str, value: usize },

    /// The front seat was already drained by an earlier retrieval (bug).
    #[error("result seat already consumed")]
    SeatConsumed,
}

impl Error {
    /// Convert a caller-side error into a `slotflow::Error`.
    ///
    /// Errors that already carry a `slotflow::Error` (for example a failure
    /// surfacing from a nested sequence) keep their kind instead of being
    /// wrapped in another `TaskFailure`.
    pub fn from_task(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            Err(err) => Error::TaskFailure(err),
        }
    }

    pub fn is_task_failure(&self) -> bool {
        matches!(self, Error::TaskFailure(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument { .. })
    }
}

/// Reject zero for a parameter that must be a positive integer.
pub(crate) fn require_positive(name: &'static str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(Error::InvalidArgument { name, value });
    }
    Ok(value)
}

pub type Result<T> = std::result::Result<T, Error>;
