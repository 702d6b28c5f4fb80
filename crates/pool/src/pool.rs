//! Worker pool with event-driven admission control.
//!
//! Capacity is a [`Semaphore`] with `max_size` permits. Every in-use worker
//! holds one permit, and so does a worker that is still being created.
//! `release` drops the permit, which wakes the next waiting `acquire`
//! directly.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::{BoxError, PoolError, PoolStats, PoolWorker, WorkerId};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of workers in use at once (and ever created).
    pub max_size: usize,
    /// How long `acquire` may wait for capacity. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            acquire_timeout: None,
        }
    }
}

impl PoolConfig {
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Worker factory
// ---------------------------------------------------------------------------

/// Creates new workers on demand.
#[async_trait]
pub trait WorkerFactory<W>: Send + Sync {
    async fn create(&self) -> Result<W, BoxError>;
}

/// Adapter turning an async closure into a [`WorkerFactory`].
pub struct FnFactory<F> {
    f: F,
}

pub fn factory_fn<F, Fut, W>(f: F) -> FnFactory<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<W, BoxError>> + Send,
{
    FnFactory { f }
}

#[async_trait]
impl<F, Fut, W> WorkerFactory<W> for FnFactory<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<W, BoxError>> + Send,
    W: Send,
{
    async fn create(&self) -> Result<W, BoxError> {
        (self.f)().await
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

struct InUse<W> {
    worker: PoolWorker<W>,
    _permit: OwnedSemaphorePermit,
}

struct PoolState<W> {
    available: VecDeque<PoolWorker<W>>,
    in_use: HashMap<WorkerId, InUse<W>>,
}

/// Bounded set of reusable workers.
///
/// Share it behind an `Arc` between the tasks that need workers.
pub struct WorkerPool<W> {
    factory: Box<dyn WorkerFactory<W>>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState<W>>,
    next_id: AtomicU64,
}

impl<W: Send + Sync + 'static> WorkerPool<W> {
    /// Create an empty pool. No worker is created until the first `acquire`.
    ///
    /// # Errors
    /// [`PoolError::InvalidSize`] if `config.max_size` is zero.
    pub fn new(
        factory: impl WorkerFactory<W> + 'static,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        if config.max_size == 0 {
            return Err(PoolError::InvalidSize);
        }
        info!("Creating worker pool (max_size={})", config.max_size);
        Ok(Self {
            factory: Box::new(factory),
            permits: Arc::new(Semaphore::new(config.max_size)),
            config,
            state: Mutex::new(PoolState {
                available: VecDeque::new(),
                in_use: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Take a worker out of the pool.
    ///
    /// Reuses an idle worker if there is one, otherwise creates one. When
    /// `max_size` workers are already in use the call waits until one is
    /// released.
    ///
    /// # Errors
    /// - [`PoolError::Timeout`] if `acquire_timeout` elapses first.
    /// - [`PoolError::Create`] if the factory fails; capacity is returned.
    /// - [`PoolError::Closed`] after [`WorkerPool::close`].
    pub async fn acquire(&self) -> Result<PoolWorker<W>, PoolError> {
        let waiting = Arc::clone(&self.permits).acquire_owned();
        let permit = match self.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, waiting)
                .await
                .map_err(|_| PoolError::Timeout(limit))?,
            None => waiting.await,
        }
        .map_err(|_| PoolError::Closed)?;

        let idle = self.state().available.pop_front();
        let worker = match idle {
            Some(worker) => {
                debug!(worker = %worker.id, "reusing idle worker");
                worker
            }
            None => {
                let handle = self.factory.create().await.map_err(PoolError::Create)?;
                let id = WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed));
                debug!(worker = %id, "created worker");
                PoolWorker {
                    id,
                    created_at: Utc::now(),
                    handle: Arc::new(handle),
                }
            }
        };

        self.state().in_use.insert(
            worker.id,
            InUse {
                worker: worker.clone(),
                _permit: permit,
            },
        );
        Ok(worker)
    }

    /// Return a worker to the pool, waking one waiting `acquire`.
    ///
    /// # Errors
    /// [`PoolError::NotAcquired`] if the worker is not currently in use.
    pub fn release(&self, worker: &PoolWorker<W>) -> Result<(), PoolError> {
        let mut state = self.state();
        let entry = state
            .in_use
            .remove(&worker.id)
            .ok_or(PoolError::NotAcquired(worker.id))?;

        // Guard against a foreign worker that happens to share an id.
        if !Arc::ptr_eq(&entry.worker.handle, &worker.handle) {
            let id = entry.worker.id;
            state.in_use.insert(id, entry);
            return Err(PoolError::NotAcquired(id));
        }

        debug!(worker = %worker.id, "released worker");
        state.available.push_back(entry.worker);
        // `entry._permit` drops here, after the worker is visible as idle.
        Ok(())
    }

    /// Acquire a worker, run `f` with it, and release it again.
    ///
    /// The worker goes back to the pool even if `f` panics or the returned
    /// future is dropped before it completes.
    pub async fn with_worker<F, Fut, T>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(PoolWorker<W>) -> Fut,
        Fut: Future<Output = T>,
    {
        let worker = self.acquire().await?;
        let _lease = Lease {
            pool: self,
            worker: worker.clone(),
        };
        Ok(f(worker).await)
    }

    /// Point-in-time occupancy snapshot.
    pub fn stats(&self) -> PoolStats {
        let state = self.state();
        PoolStats {
            total: state.available.len() + state.in_use.len(),
            available: state.available.len(),
            in_use: state.in_use.len(),
            max_size: self.config.max_size,
        }
    }

    /// Stop admitting new work. Pending and future `acquire` calls fail with
    /// [`PoolError::Closed`]; workers already acquired can still be released.
    pub fn close(&self) {
        info!("Closing worker pool");
        self.permits.close();
    }

    fn state(&self) -> MutexGuard<'_, PoolState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases its worker when dropped.
struct Lease<'a, W: Send + Sync + 'static> {
    pool: &'a WorkerPool<W>,
    worker: PoolWorker<W>,
}

impl<W: Send + Sync + 'static> Drop for Lease<'_, W> {
    fn drop(&mut self) {
        // Fails only if the closure released the worker itself.
        if let Err(e) = self.pool.release(&self.worker) {
            debug!(worker = %self.worker.id, "lease not returned: {e}");
        }
    }
}
