//! Core domain models for the workflow engine.
//!
//! [`WorkflowDefinition`] is the serialisable description of a task graph,
//! as read from a JSON file. The run-time view of an engine is exposed
//! through [`EngineState`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A single task in a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique name within the workflow (referenced by `depends_on`).
    pub name: String,
    /// Maps to a factory in the `TaskRegistry`.
    pub kind: String,
    /// Passed to the factory when the task body is built.
    #[serde(default)]
    pub config: Value,
    /// Names of the tasks whose results this task receives, in order.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Dispatch priority among ready tasks; higher runs first.
    #[serde(default)]
    pub priority: i64,
}

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Engine-wide state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Per-task state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not dispatched (yet, or ever if the run failed first).
    Pending,
    Running,
    Completed,
    Failed,
    /// Was running when the run was aborted.
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot returned by `WorkflowEngine::get_state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineState {
    pub run_state: RunState,
    pub tasks: BTreeMap<String, TaskStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl EngineState {
    /// Status of a single task, if it is registered.
    pub fn status(&self, task: &str) -> Option<TaskStatus> {
        self.tasks.get(task).copied()
    }
}
