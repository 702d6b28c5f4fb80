//! Observation of engine runs.
//!
//! The engine announces every lifecycle step as an [`EngineEvent`] on a
//! broadcast channel. Registered [`EventSink`]s are fed from that channel by
//! one forwarding task each, so a slow or failing sink never holds up the
//! dispatch loop. A sink that falls more than the channel capacity behind
//! skips the missed events and is told how many in the log.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A single observation record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum EngineEvent {
    #[serde(rename = "start")]
    Start { execution_id: Uuid, tasks: usize },
    #[serde(rename = "task:start")]
    TaskStart { task: String },
    #[serde(rename = "task:complete")]
    TaskComplete { task: String, result: Value },
    #[serde(rename = "task:error")]
    TaskError { task: String, error: String },
    #[serde(rename = "complete")]
    Complete { results: HashMap<String, Value> },
    #[serde(rename = "error")]
    Error { error: String },
}

impl EngineEvent {
    /// The event's wire name, e.g. `task:complete`.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Start { .. } => "start",
            EngineEvent::TaskStart { .. } => "task:start",
            EngineEvent::TaskComplete { .. } => "task:complete",
            EngineEvent::TaskError { .. } => "task:error",
            EngineEvent::Complete { .. } => "complete",
            EngineEvent::Error { .. } => "error",
        }
    }

    /// `complete` and `error` close a run; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineEvent::Complete { .. } | EngineEvent::Error { .. })
    }
}

#[derive(Debug, Error)]
#[error("event sink failed: {0}")]
pub struct SinkError(pub String);

/// Receives the events of a run, in order, on its own forwarding task.
///
/// Keep `deliver` short: a sink that blocks only delays itself, but it
/// occupies a runtime worker while it does.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &EngineEvent) -> Result<(), SinkError>;
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn deliver(&self, event: &EngineEvent) -> Result<(), SinkError> {
        match event {
            EngineEvent::Start { execution_id, tasks } => {
                info!(event = event.name(), %execution_id, tasks, "workflow started")
            }
            EngineEvent::TaskStart { task } => info!(event = event.name(), task, "task started"),
            EngineEvent::TaskComplete { task, .. } => {
                info!(event = event.name(), task, "task completed")
            }
            EngineEvent::TaskError { task, error } => {
                warn!(event = event.name(), task, error, "task failed")
            }
            EngineEvent::Complete { results } => {
                info!(event = event.name(), results = results.len(), "workflow completed")
            }
            EngineEvent::Error { error } => warn!(event = event.name(), error, "workflow failed"),
        }
        Ok(())
    }
}

/// Broadcast channel plus the sinks fed from it.
pub(crate) struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            sinks: Vec::new(),
            tx,
        }
    }

    pub(crate) fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Spawn one forwarding task per sink. Each ends after the run's
    /// terminal event, or when the bus is dropped.
    ///
    /// Must be called from within a tokio runtime, before the first `emit`
    /// of the run.
    pub(crate) fn start_sinks(&self) -> Vec<JoinHandle<()>> {
        self.sinks
            .iter()
            .map(|sink| tokio::spawn(forward(Arc::clone(sink), self.tx.subscribe())))
            .collect()
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        // No receivers is not an error for the engine.
        let _ = self.tx.send(event);
    }
}

async fn forward(sink: Arc<dyn EventSink>, mut rx: broadcast::Receiver<EngineEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(e) = sink.deliver(&event) {
                    warn!(event = event.name(), "dropping event for failed sink: {e}");
                }
                if event.is_terminal() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event sink fell behind, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("event sink detached");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recording(Mutex<Vec<&'static str>>);

    impl EventSink for Recording {
        fn deliver(&self, event: &EngineEvent) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(event.name());
            Ok(())
        }
    }

    struct Broken;

    impl EventSink for Broken {
        fn deliver(&self, _event: &EngineEvent) -> Result<(), SinkError> {
            Err(SinkError("dashboard offline".into()))
        }
    }

    #[test]
    fn events_serialise_with_their_wire_name() {
        let event = EngineEvent::TaskComplete { task: "fetch".into(), result: json!({ "n": 1 }) };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "task:complete", "task": "fetch", "result": { "n": 1 } })
        );
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_delivery() {
        let recording = Arc::new(Recording(Mutex::new(Vec::new())));
        let mut bus = EventBus::new(8);
        bus.add_sink(Arc::new(Broken));
        bus.add_sink(recording.clone());
        let mut rx = bus.subscribe();
        let forwarders = bus.start_sinks();

        bus.emit(EngineEvent::TaskStart { task: "a".into() });
        bus.emit(EngineEvent::Error { error: "x".into() });

        for forwarder in forwarders {
            forwarder.await.unwrap();
        }
        assert_eq!(*recording.0.lock().unwrap(), vec!["task:start", "error"]);
        assert_eq!(rx.try_recv().unwrap().name(), "task:start");
        assert_eq!(rx.try_recv().unwrap().name(), "error");
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        let bus = EventBus::new(1);
        bus.emit(EngineEvent::Start { execution_id: Uuid::nil(), tasks: 0 });
        bus.emit(EngineEvent::Complete { results: HashMap::new() });
    }

    #[test]
    fn only_complete_and_error_are_terminal() {
        assert!(EngineEvent::Error { error: "x".into() }.is_terminal());
        assert!(EngineEvent::Complete { results: HashMap::new() }.is_terminal());
        assert!(!EngineEvent::TaskError { task: "a".into(), error: "x".into() }.is_terminal());
    }
}
