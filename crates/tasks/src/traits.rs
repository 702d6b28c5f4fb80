//! The `ExecutableTask` trait — the contract every task body must fulfil.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::TaskError;

/// Context handed to every task during a run.
///
/// The engine treats `input` as opaque: it is whatever the caller passed to
/// `execute`, cloned into each task unchanged.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the current run.
    pub execution_id: Uuid,
    /// Name of the task this context was issued to. Empty for the run-level
    /// context.
    pub task: String,
    /// Caller-supplied input for the whole run.
    pub input: Value,
    /// Fires when the run is aborted, either by a sibling failure or by the
    /// caller. Long-running tasks should select on it.
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(input: Value, cancel: CancellationToken) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            task: String::new(),
            input,
            cancel,
        }
    }

    /// Derive the context for a single task of this run.
    pub fn for_task(&self, task: impl Into<String>) -> Self {
        Self {
            execution_id: self.execution_id,
            task: task.into(),
            input: self.input.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The core task trait.
#[async_trait]
pub trait ExecutableTask: Send + Sync {
    /// Execute the task.
    ///
    /// `deps` holds the results of this task's dependencies, in the order
    /// the dependencies were declared.
    async fn execute(&self, deps: Vec<Value>, ctx: &ExecutionContext) -> Result<Value, TaskError>;
}

/// Adapter turning an async closure into an [`ExecutableTask`].
///
/// Built with [`task_fn`].
pub struct FnTask<F> {
    f: F,
}

/// Wrap `f` so it can be registered as a task.
///
/// ```ignore
/// engine.add_task("double", task_fn(|deps, _ctx| async move {
///     let n = deps[0].as_i64().unwrap_or_default();
///     Ok(serde_json::json!(n * 2))
/// }))?;
/// ```
pub fn task_fn<F, Fut>(f: F) -> FnTask<F>
where
    F: Fn(Vec<Value>, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    FnTask { f }
}

#[async_trait]
impl<F, Fut> ExecutableTask for FnTask<F>
where
    F: Fn(Vec<Value>, ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    async fn execute(&self, deps: Vec<Value>, ctx: &ExecutionContext) -> Result<Value, TaskError> {
        (self.f)(deps, ctx.clone()).await
    }
}
