//! Built-in task kinds and the registry that maps `kind` strings to them.
//!
//! Workflow definitions loaded from JSON name each task's body by `kind`.
//! The engine asks a [`TaskRegistry`] to build the body from the task's
//! `config` value.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{ExecutableTask, ExecutionContext, TaskError};

/// Builds a task body from its JSON configuration.
pub type TaskFactory =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn ExecutableTask>, TaskError> + Send + Sync>;

/// Maps `kind` strings to task factories.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with `constant`, `collect`, `sleep` and `fail`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("constant", |config: &Value| {
            Ok(Arc::new(ConstantTask { value: config.clone() }) as Arc<dyn ExecutableTask>)
        });
        registry.register("collect", |_: &Value| {
            Ok(Arc::new(CollectTask) as Arc<dyn ExecutableTask>)
        });
        registry.register("sleep", |config: &Value| {
            let cfg: SleepConfig = serde_json::from_value(config.clone())
                .map_err(|e| TaskError::fatal(format!("invalid sleep config: {e}")))?;
            Ok(Arc::new(SleepTask {
                duration: Duration::from_millis(cfg.ms),
                value: cfg.value,
            }) as Arc<dyn ExecutableTask>)
        });
        registry.register("fail", |config: &Value| {
            let message = config
                .as_str()
                .or_else(|| config.get("message").and_then(Value::as_str))
                .unwrap_or("task failed")
                .to_owned();
            Ok(Arc::new(FailTask { message }) as Arc<dyn ExecutableTask>)
        });
        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn ExecutableTask>, TaskError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Build a task body, or `None` if `kind` is not registered.
    pub fn build(
        &self,
        kind: &str,
        config: &Value,
    ) -> Option<Result<Arc<dyn ExecutableTask>, TaskError>> {
        self.factories.get(kind).map(|factory| factory(config))
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Built-in kinds
// ---------------------------------------------------------------------------

/// Returns its configuration unchanged.
struct ConstantTask {
    value: Value,
}

#[async_trait]
impl ExecutableTask for ConstantTask {
    async fn execute(&self, _deps: Vec<Value>, _ctx: &ExecutionContext) -> Result<Value, TaskError> {
        Ok(self.value.clone())
    }
}

/// Returns the dependency results as a JSON array.
struct CollectTask;

#[async_trait]
impl ExecutableTask for CollectTask {
    async fn execute(&self, deps: Vec<Value>, _ctx: &ExecutionContext) -> Result<Value, TaskError> {
        Ok(Value::Array(deps))
    }
}

#[derive(Debug, Deserialize)]
struct SleepConfig {
    ms: u64,
    #[serde(default)]
    value: Value,
}

/// Waits, then returns `value`. Gives up early if the run is cancelled.
struct SleepTask {
    duration: Duration,
    value: Value,
}

#[async_trait]
impl ExecutableTask for SleepTask {
    async fn execute(&self, _deps: Vec<Value>, ctx: &ExecutionContext) -> Result<Value, TaskError> {
        debug!(task = %ctx.task, duration = ?self.duration, "sleeping");
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => Ok(self.value.clone()),
            _ = ctx.cancel.cancelled() => Err(TaskError::fatal("cancelled while sleeping")),
        }
    }
}

/// Always fails fatally.
struct FailTask {
    message: String,
}

#[async_trait]
impl ExecutableTask for FailTask {
    async fn execute(&self, _deps: Vec<Value>, _ctx: &ExecutionContext) -> Result<Value, TaskError> {
        Err(TaskError::Fatal(self.message.clone()))
    }
}
