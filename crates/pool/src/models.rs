//! Handles and snapshots handed out by the pool.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifier assigned to each worker by its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(pub(crate) u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pooled worker.
///
/// Cloning the handle does not duplicate the worker; it only gives another
/// reference to the same one. The pool tracks workers by [`WorkerId`], so
/// releasing a clone releases the original.
pub struct PoolWorker<W> {
    pub(crate) id: WorkerId,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) handle: Arc<W>,
}

impl<W> PoolWorker<W> {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The worker produced by the factory.
    pub fn handle(&self) -> &W {
        &self.handle
    }
}

impl<W> Clone for PoolWorker<W> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            created_at: self.created_at,
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<W> fmt::Debug for PoolWorker<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolWorker")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Workers created so far (`available + in_use`).
    pub total: usize,
    pub available: usize,
    pub in_use: usize,
    pub max_size: usize,
}
