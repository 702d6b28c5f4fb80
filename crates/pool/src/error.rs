//! Typed error type for the pool crate.

use std::time::Duration;

use thiserror::Error;

use crate::WorkerId;

/// Opaque error returned by a worker factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool max_size must be at least 1")]
    InvalidSize,

    /// The worker is not in the in-use set: it was already released, or it
    /// belongs to another pool.
    #[error("worker {0} is not currently acquired")]
    NotAcquired(WorkerId),

    #[error("worker factory failed: {0}")]
    Create(#[source] BoxError),

    #[error("no worker became available within {0:?}")]
    Timeout(Duration),

    #[error("pool is closed")]
    Closed,
}
