//! `MockTask` — a test double for `ExecutableTask`.
//!
//! Useful in unit and integration tests where a real task body is either
//! unavailable or irrelevant.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{ExecutableTask, ExecutionContext, TaskError};

/// Behaviour injected into `MockTask` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `failures` calls, then
    /// return `value`.
    Flaky { failures: usize, value: Value },
}

/// A mock task that records every call it receives and returns a
/// programmer-specified result.
pub struct MockTask {
    /// Label used in test assertions.
    pub name: String,
    /// What the task will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Optional delay before the behaviour kicks in.
    pub delay: Option<Duration>,
    /// Dependency inputs seen by this task (in call order).
    pub calls: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl MockTask {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails `failures` times before returning `value`.
    pub fn flaky(name: impl Into<String>, failures: usize, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Flaky { failures, value })
    }

    /// Sleep for `delay` on every call before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Handle on the recorded calls that outlives the mock once it has been
    /// moved into an engine.
    pub fn calls_handle(&self) -> Arc<Mutex<Vec<Vec<Value>>>> {
        Arc::clone(&self.calls)
    }

    /// Number of times this task has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl ExecutableTask for MockTask {
    async fn execute(&self, deps: Vec<Value>, _ctx: &ExecutionContext) -> Result<Value, TaskError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.push(deps);
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::FailRetryable(msg) => Err(TaskError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(TaskError::Fatal(msg.clone())),
            MockBehaviour::Flaky { failures, value } => {
                if attempt <= *failures {
                    Err(TaskError::Retryable(format!("{} attempt {attempt} failed", self.name)))
                } else {
                    Ok(value.clone())
                }
            }
        }
    }
}
