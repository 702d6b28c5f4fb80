//! Errors a task body can return.

use thiserror::Error;

/// Why a task body produced no value.
///
/// A `Retryable` failure is run again while the engine's `max_retries`
/// budget lasts, waiting twice as long before each new attempt. When the
/// budget is spent the run fails with `RetryExhausted`. A `Fatal` failure
/// fails the run on first sight.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("retryable task error: {0}")]
    Retryable(String),

    #[error("fatal task error: {0}")]
    Fatal(String),
}

impl TaskError {
    /// Shorthand for a fatal error from anything displayable.
    pub fn fatal(msg: impl std::fmt::Display) -> Self {
        Self::Fatal(msg.to_string())
    }

    /// Whether the engine may spend a retry on this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
