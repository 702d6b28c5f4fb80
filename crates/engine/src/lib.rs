//! `engine` crate — DAG validation, run state, events and the workflow engine.

pub mod dag;
pub mod error;
pub mod events;
pub mod executor;
pub mod models;

pub use error::EngineError;
pub use events::{EngineEvent, EventSink, SinkError, TracingSink};
pub use executor::{EngineConfig, WorkflowEngine};
pub use models::{EngineState, RunState, TaskDefinition, TaskStatus, WorkflowDefinition};
