//! `tasks` crate — the `ExecutableTask` trait and built-in task kinds.
//!
//! Every unit of work the engine schedules implements [`ExecutableTask`].
//! Closures are adapted through [`task_fn`]; workflow definitions loaded
//! from JSON resolve their task bodies through a [`TaskRegistry`].

pub mod builtin;
pub mod error;
pub mod mock;
pub mod traits;

pub use builtin::{TaskFactory, TaskRegistry};
pub use error::TaskError;
pub use traits::{task_fn, ExecutableTask, ExecutionContext, FnTask};
