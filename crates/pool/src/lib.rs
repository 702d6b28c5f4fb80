//! `pool` crate — bounded pool of reusable worker handles.
//!
//! Workers are created lazily through an injected [`WorkerFactory`] and are
//! never destroyed while the pool lives. At most `max_size` of them are in
//! use at once; further callers of [`WorkerPool::acquire`] wait until one is
//! released.

pub mod error;
pub mod models;
pub mod pool;

pub use error::{BoxError, PoolError};
pub use models::{PoolStats, PoolWorker, WorkerId};
pub use pool::{factory_fn, FnFactory, PoolConfig, WorkerFactory, WorkerPool};
