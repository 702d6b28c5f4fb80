//! Engine-level error types.

use std::time::Duration;

use tasks::TaskError;
use thiserror::Error;

/// Errors produced by the workflow engine (registration, validation and
/// execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Registration errors ------

    /// A task with this name is already registered.
    #[error("duplicate task name: '{0}'")]
    DuplicateTask(String),

    /// The task was never added.
    #[error("unknown task: '{0}'")]
    UnknownTask(String),

    #[error("task '{0}' cannot depend on itself")]
    SelfDependency(String),

    /// A definition names a task kind the registry cannot build.
    #[error("task '{task}' uses unregistered kind '{kind}'")]
    UnknownTaskKind { task: String, kind: String },

    #[error("task '{task}' has invalid configuration: {source}")]
    InvalidTaskConfig {
        task: String,
        #[source]
        source: TaskError,
    },

    // ------ Validation errors ------

    /// A dependency was declared but never added by execution time.
    #[error("task '{task}' depends on unregistered task '{dependency}'")]
    UnresolvedDependency { task: String, dependency: String },

    /// The graph cannot make progress: a cycle, or tasks stuck behind one.
    #[error("workflow cannot make progress; blocked tasks: {tasks:?}")]
    Deadlock { tasks: Vec<String> },

    // ------ Execution errors ------

    /// `execute` was called on an engine that already ran.
    #[error("workflow has already been executed")]
    AlreadyStarted,

    /// A task failed; the whole run is aborted.
    #[error("task '{task}' failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: TaskError,
    },

    /// A task's retryable error outlived the retry budget.
    #[error("task '{task}' exceeded retry limit after {attempts} attempts: {source}")]
    RetryExhausted {
        task: String,
        attempts: u32,
        #[source]
        source: TaskError,
    },

    #[error("task '{task}' timed out after {after:?}")]
    Timeout { task: String, after: Duration },

    #[error("task '{task}' panicked")]
    TaskPanicked { task: String },

    /// The caller cancelled the run.
    #[error("workflow execution was cancelled")]
    Cancelled,
}

impl EngineError {
    /// Name of the task this error is about, when there is one.
    pub fn task(&self) -> Option<&str> {
        match self {
            EngineError::DuplicateTask(task)
            | EngineError::UnknownTask(task)
            | EngineError::SelfDependency(task)
            | EngineError::UnknownTaskKind { task, .. }
            | EngineError::InvalidTaskConfig { task, .. }
            | EngineError::UnresolvedDependency { task, .. }
            | EngineError::TaskFailed { task, .. }
            | EngineError::RetryExhausted { task, .. }
            | EngineError::Timeout { task, .. }
            | EngineError::TaskPanicked { task } => Some(task),
            EngineError::Deadlock { .. } | EngineError::AlreadyStarted | EngineError::Cancelled => {
                None
            }
        }
    }
}
