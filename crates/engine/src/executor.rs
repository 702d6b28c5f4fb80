//! Workflow execution engine.
//!
//! `WorkflowEngine` is the central orchestrator:
//! 1. Tasks are registered by name, with their dependencies declared
//!    separately (possibly before the dependency itself is added).
//! 2. `execute` resolves the dependency names, rejects cycles (Kahn's
//!    algorithm) and then dispatches every ready task concurrently.
//! 3. Each task receives its dependencies' results in declared order.
//! 4. The first task failure aborts the run: siblings that already
//!    finished keep their outcome, the rest are cancelled, and
//!    never-dispatched tasks stay `pending`.
//!
//! All run state is mutated by the dispatch loop alone. Readers get
//! snapshots through [`WorkflowEngine::get_state`], which is safe to call
//! from another task while a run is in progress.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue::PriorityTaskQueue;
use serde_json::Value;
use tasks::{task_fn, ExecutableTask, ExecutionContext, TaskError, TaskRegistry};
use tokio::sync::broadcast;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dag::{dependents_of, topological_order};
use crate::events::{EngineEvent, EventBus, EventSink};
use crate::models::{EngineState, RunState, TaskStatus, WorkflowDefinition};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on tasks running at once. `None` dispatches every ready
    /// task immediately.
    pub max_concurrency: Option<usize>,
    /// Deadline for a single attempt of a task.
    pub task_timeout: Option<Duration>,
    /// How many times a `TaskError::Retryable` is retried before the run
    /// fails. Zero keeps the run strictly fail-fast.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
    /// Buffer size of the broadcast channel behind `subscribe`.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            task_timeout: None,
            max_retries: 0,
            retry_base_delay: Duration::from_millis(100),
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AttemptPolicy {
    timeout: Option<Duration>,
    max_retries: u32,
    base_delay: Duration,
}

impl From<&EngineConfig> for AttemptPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timeout: config.task_timeout,
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct TaskSlot {
    name: String,
    body: Arc<dyn ExecutableTask>,
    deps: Vec<String>,
    priority: i64,
}

/// Everything `get_state` and `results` can observe. Indexed like `slots`.
struct RunRecord {
    run_state: RunState,
    statuses: Vec<TaskStatus>,
    results: HashMap<String, Value>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

type Outcome = (usize, Result<Value, EngineError>);

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Runs a graph of named, interdependent tasks once.
///
/// Build the graph with `&mut self` methods, then call
/// [`WorkflowEngine::execute`]. To watch a run from elsewhere, put the
/// engine in an `Arc` first.
pub struct WorkflowEngine {
    slots: Vec<TaskSlot>,
    index: HashMap<String, usize>,
    config: EngineConfig,
    record: Mutex<RunRecord>,
    events: EventBus,
    cancel: CancellationToken,
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl WorkflowEngine {
    /// Create an empty engine.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            events: EventBus::new(config.event_capacity),
            config,
            record: Mutex::new(RunRecord {
                run_state: RunState::Idle,
                statuses: Vec::new(),
                results: HashMap::new(),
                started_at: None,
                finished_at: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Build an engine from a serialised definition, resolving each task's
    /// body through `registry`.
    ///
    /// # Errors
    /// - [`EngineError::UnknownTaskKind`] if a `kind` is not registered.
    /// - [`EngineError::InvalidTaskConfig`] if a factory rejects its config.
    /// - Any registration error (`DuplicateTask`, `SelfDependency`).
    pub fn from_definition(
        definition: &WorkflowDefinition,
        registry: &TaskRegistry,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let mut engine = Self::new(config);

        for task in &definition.tasks {
            let body = registry
                .build(&task.kind, &task.config)
                .ok_or_else(|| EngineError::UnknownTaskKind {
                    task: task.name.clone(),
                    kind: task.kind.clone(),
                })?
                .map_err(|source| EngineError::InvalidTaskConfig {
                    task: task.name.clone(),
                    source,
                })?;
            engine.add_shared(task.name.clone(), body)?;
            engine.set_priority(&task.name, task.priority)?;
        }

        for task in &definition.tasks {
            engine.depends_on(&task.name, task.depends_on.iter().cloned())?;
        }

        debug!(
            "Loaded workflow '{}' with {} tasks",
            definition.name,
            engine.len()
        );
        Ok(engine)
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a task in `pending` state with no dependencies.
    ///
    /// # Errors
    /// [`EngineError::DuplicateTask`] if the name is taken.
    pub fn add_task<T>(&mut self, name: impl Into<String>, task: T) -> Result<(), EngineError>
    where
        T: ExecutableTask + 'static,
    {
        self.add_shared(name, Arc::new(task))
    }

    /// Register an async closure as a task. See [`tasks::task_fn`].
    pub fn add_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<(), EngineError>
    where
        F: Fn(Vec<Value>, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        self.add_task(name, task_fn(f))
    }

    /// Register a task body that is already shared.
    pub fn add_shared(
        &mut self,
        name: impl Into<String>,
        body: Arc<dyn ExecutableTask>,
    ) -> Result<(), EngineError> {
        self.ensure_idle()?;
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(EngineError::DuplicateTask(name));
        }

        self.index.insert(name.clone(), self.slots.len());
        self.slots.push(TaskSlot {
            name,
            body,
            deps: Vec::new(),
            priority: 0,
        });
        self.record_mut().statuses.push(TaskStatus::Pending);
        Ok(())
    }

    /// Set (overwrite) the ordered dependency list of `name`.
    ///
    /// Dependencies may name tasks that are added later; they are resolved
    /// when the workflow is validated.
    ///
    /// # Errors
    /// - [`EngineError::UnknownTask`] if `name` was never added.
    /// - [`EngineError::SelfDependency`] if `name` lists itself.
    pub fn depends_on<I, S>(&mut self, name: &str, deps: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_idle()?;
        let idx = self.slot_index(name)?;
        let deps: Vec<String> = deps.into_iter().map(Into::into).collect();
        if deps.iter().any(|dep| dep == name) {
            return Err(EngineError::SelfDependency(name.to_owned()));
        }
        self.slots[idx].deps = deps;
        Ok(())
    }

    /// Order among tasks that are ready at the same time; higher goes first.
    /// Only observable when `max_concurrency` holds tasks back.
    pub fn set_priority(&mut self, name: &str, priority: i64) -> Result<(), EngineError> {
        self.ensure_idle()?;
        let idx = self.slot_index(name)?;
        self.slots[idx].priority = priority;
        Ok(())
    }

    /// Deliver every event of the run to `sink`, from a task of its own.
    pub fn add_sink(&mut self, sink: impl EventSink + 'static) {
        self.events.add_sink(Arc::new(sink));
    }

    /// Receive events of the run over a channel. Subscribe before calling
    /// `execute` to see them all.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Abort the current (or next) run with [`EngineError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The caller-side cancellation handle for this engine.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Point-in-time snapshot of the run state and every task's status.
    pub fn get_state(&self) -> EngineState {
        let record = self.record();
        EngineState {
            run_state: record.run_state,
            tasks: self
                .slots
                .iter()
                .zip(&record.statuses)
                .map(|(slot, status)| (slot.name.clone(), *status))
                .collect::<BTreeMap<_, _>>(),
            started_at: record.started_at,
            finished_at: record.finished_at,
        }
    }

    /// Results of the tasks completed so far.
    pub fn results(&self) -> HashMap<String, Value> {
        self.record().results.clone()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check that every dependency exists and the graph is acyclic.
    ///
    /// Returns the task names in a valid execution order.
    ///
    /// # Errors
    /// - [`EngineError::UnresolvedDependency`] for a dependency never added.
    /// - [`EngineError::Deadlock`] if the graph contains a cycle.
    pub fn validate(&self) -> Result<Vec<String>, EngineError> {
        let (_, order) = self.resolve()?;
        Ok(order
            .into_iter()
            .map(|idx| self.slots[idx].name.clone())
            .collect())
    }

    fn resolve(&self) -> Result<(Vec<Vec<usize>>, Vec<usize>), EngineError> {
        let deps = self
            .slots
            .iter()
            .map(|slot| {
                slot.deps
                    .iter()
                    .map(|dep| {
                        self.index.get(dep).copied().ok_or_else(|| {
                            EngineError::UnresolvedDependency {
                                task: slot.name.clone(),
                                dependency: dep.clone(),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let order = topological_order(&deps).map_err(|blocked| EngineError::Deadlock {
            tasks: blocked
                .into_iter()
                .map(|idx| self.slots[idx].name.clone())
                .collect(),
        })?;

        Ok((deps, order))
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run every task and return the complete result mapping.
    ///
    /// `input` is handed to each task through its [`ExecutionContext`].
    ///
    /// # Errors
    /// - [`EngineError::AlreadyStarted`] if this engine has run before.
    /// - Validation errors, see [`WorkflowEngine::validate`].
    /// - The first task failure (`TaskFailed`, `RetryExhausted`, `Timeout`,
    ///   `TaskPanicked`), naming the task.
    /// - [`EngineError::Cancelled`] if [`WorkflowEngine::cancel`] was called.
    #[instrument(skip(self, input), fields(tasks = self.slots.len()))]
    pub async fn execute(&self, input: Value) -> Result<HashMap<String, Value>, EngineError> {
        {
            let mut record = self.record();
            if record.run_state != RunState::Idle {
                return Err(EngineError::AlreadyStarted);
            }
            record.run_state = RunState::Running;
            record.started_at = Some(Utc::now());
        }
        // Sinks run detached and finish on the terminal event.
        drop(self.events.start_sinks());

        let (deps, _) = match self.resolve() {
            Ok(resolved) => resolved,
            Err(e) => {
                self.finish_failed(&e);
                return Err(e);
            }
        };

        let ctx = ExecutionContext::new(input, self.cancel.child_token());
        info!(
            execution_id = %ctx.execution_id,
            "DAG validated — executing {} tasks",
            self.slots.len()
        );
        self.events.emit(EngineEvent::Start {
            execution_id: ctx.execution_id,
            tasks: self.slots.len(),
        });

        let mut in_flight: JoinSet<Outcome> = JoinSet::new();
        let mut running: HashMap<Id, usize> = HashMap::new();

        let outcome = self
            .dispatch_loop(&deps, &ctx, &mut in_flight, &mut running)
            .await;

        match outcome {
            Ok(results) => {
                {
                    let mut record = self.record();
                    record.run_state = RunState::Completed;
                    record.finished_at = Some(Utc::now());
                }
                info!(execution_id = %ctx.execution_id, "workflow execution succeeded");
                self.events.emit(EngineEvent::Complete {
                    results: results.clone(),
                });
                Ok(results)
            }
            Err(e) => {
                self.abort_in_flight(&ctx, &mut in_flight, &mut running).await;
                self.finish_failed(&e);
                Err(e)
            }
        }
    }

    async fn dispatch_loop(
        &self,
        deps: &[Vec<usize>],
        ctx: &ExecutionContext,
        in_flight: &mut JoinSet<Outcome>,
        running: &mut HashMap<Id, usize>,
    ) -> Result<HashMap<String, Value>, EngineError> {
        let n = self.slots.len();
        let dependents = dependents_of(deps);
        let mut waiting_on: Vec<usize> = deps.iter().map(Vec::len).collect();
        let mut outputs: Vec<Option<Value>> = vec![None; n];
        let mut completed = 0usize;
        let limit = self.config.max_concurrency.map_or(usize::MAX, |m| m.max(1));

        let mut ready: PriorityTaskQueue<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(idx, _)| waiting_on[*idx] == 0)
            .map(|(idx, slot)| (idx, slot.priority))
            .collect();

        while completed < n {
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            while in_flight.len() < limit {
                let Some(idx) = ready.dequeue() else { break };
                let inputs = deps[idx]
                    .iter()
                    .map(|&dep| outputs[dep].clone().unwrap_or_default())
                    .collect();
                let id = self.dispatch(idx, inputs, ctx, in_flight);
                running.insert(id, idx);
            }

            if in_flight.is_empty() {
                // Nothing running and nothing ready, yet tasks remain.
                return Err(EngineError::Deadlock {
                    tasks: (0..n)
                        .filter(|&idx| outputs[idx].is_none())
                        .map(|idx| self.slots[idx].name.clone())
                        .collect(),
                });
            }

            let joined = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
                joined = in_flight.join_next_with_id() => joined,
            };

            let (idx, outcome) = match joined {
                Some(Ok((id, (idx, outcome)))) => {
                    running.remove(&id);
                    (idx, outcome)
                }
                Some(Err(join_err)) => match running.remove(&join_err.id()) {
                    Some(idx) => (
                        idx,
                        Err(EngineError::TaskPanicked {
                            task: self.slots[idx].name.clone(),
                        }),
                    ),
                    None => continue,
                },
                None => continue,
            };

            match outcome {
                Ok(value) => {
                    self.mark_completed(idx, &value);
                    outputs[idx] = Some(value);
                    completed += 1;

                    for &next in &dependents[idx] {
                        waiting_on[next] -= 1;
                        if waiting_on[next] == 0 {
                            ready.enqueue(next, self.slots[next].priority);
                        }
                    }
                }
                Err(e) => {
                    self.mark_failed(idx, &e);
                    return Err(e);
                }
            }
        }

        Ok(self
            .slots
            .iter()
            .zip(outputs)
            .filter_map(|(slot, output)| output.map(|value| (slot.name.clone(), value)))
            .collect())
    }

    fn dispatch(
        &self,
        idx: usize,
        inputs: Vec<Value>,
        ctx: &ExecutionContext,
        in_flight: &mut JoinSet<Outcome>,
    ) -> Id {
        let slot = &self.slots[idx];
        debug!(task = %slot.name, inputs = inputs.len(), "dispatching task");

        self.record().statuses[idx] = TaskStatus::Running;
        self.events.emit(EngineEvent::TaskStart {
            task: slot.name.clone(),
        });

        let body = Arc::clone(&slot.body);
        let task_ctx = ctx.for_task(&slot.name);
        let policy = AttemptPolicy::from(&self.config);
        in_flight
            .spawn(async move { (idx, run_attempts(body, inputs, task_ctx, policy).await) })
            .id()
    }

    /// Stop every task still in flight after the run has failed.
    ///
    /// Siblings that already finished keep their outcome. The rest are
    /// cancelled and aborted; one whose body beats the abort still keeps its
    /// result, anything else ends up `cancelled`.
    async fn abort_in_flight(
        &self,
        ctx: &ExecutionContext,
        in_flight: &mut JoinSet<Outcome>,
        running: &mut HashMap<Id, usize>,
    ) {
        while let Some(joined) = in_flight.try_join_next_with_id() {
            self.settle_aborted(joined, running, ctx.is_cancelled());
        }

        ctx.cancel.cancel();
        in_flight.abort_all();
        while let Some(joined) = in_flight.join_next_with_id().await {
            self.settle_aborted(joined, running, true);
        }

        let mut record = self.record();
        for &idx in running.values() {
            record.statuses[idx] = TaskStatus::Cancelled;
        }
    }

    /// Once the run is cancelled, a task error is put down to the cancellation.
    fn settle_aborted(
        &self,
        joined: Result<(Id, Outcome), JoinError>,
        running: &mut HashMap<Id, usize>,
        cancelled: bool,
    ) {
        let id = match &joined {
            Ok((id, _)) => *id,
            Err(join_err) => join_err.id(),
        };
        let Some(idx) = running.remove(&id) else {
            return;
        };

        match joined {
            Ok((_, (_, Ok(value)))) => self.mark_completed(idx, &value),
            Ok((_, (_, Err(e)))) if !cancelled => self.mark_failed(idx, &e),
            Err(join_err) if join_err.is_panic() => self.mark_failed(
                idx,
                &EngineError::TaskPanicked {
                    task: self.slots[idx].name.clone(),
                },
            ),
            _ => {
                debug!(task = %self.slots[idx].name, "task cancelled");
                self.record().statuses[idx] = TaskStatus::Cancelled;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn mark_completed(&self, idx: usize, value: &Value) {
        let name = &self.slots[idx].name;
        debug!(task = %name, "task completed");
        {
            let mut record = self.record();
            record.statuses[idx] = TaskStatus::Completed;
            record.results.insert(name.clone(), value.clone());
        }
        self.events.emit(EngineEvent::TaskComplete {
            task: name.clone(),
            result: value.clone(),
        });
    }

    fn mark_failed(&self, idx: usize, e: &EngineError) {
        let name = &self.slots[idx].name;
        error!(task = %name, "task failed: {e}");
        self.record().statuses[idx] = TaskStatus::Failed;
        self.events.emit(EngineEvent::TaskError {
            task: name.clone(),
            error: e.to_string(),
        });
    }

    fn finish_failed(&self, e: &EngineError) {
        {
            let mut record = self.record();
            record.run_state = RunState::Failed;
            record.finished_at = Some(Utc::now());
        }
        error!("workflow execution failed: {e}");
        self.events.emit(EngineEvent::Error {
            error: e.to_string(),
        });
    }

    fn slot_index(&self, name: &str) -> Result<usize, EngineError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownTask(name.to_owned()))
    }

    fn ensure_idle(&mut self) -> Result<(), EngineError> {
        if self.record_mut().run_state == RunState::Idle {
            Ok(())
        } else {
            Err(EngineError::AlreadyStarted)
        }
    }

    fn record(&self) -> MutexGuard<'_, RunRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_mut(&mut self) -> &mut RunRecord {
        self.record.get_mut().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Internal: run a single task with timeout and retry logic.
// ---------------------------------------------------------------------------

async fn run_attempts(
    body: Arc<dyn ExecutableTask>,
    inputs: Vec<Value>,
    ctx: ExecutionContext,
    policy: AttemptPolicy,
) -> Result<Value, EngineError> {
    let task = ctx.task.clone();
    let mut retries = 0u32;

    loop {
        let attempt = body.execute(inputs.clone(), &ctx);
        let outcome = match policy.timeout {
            Some(after) => match tokio::time::timeout(after, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(EngineError::Timeout { task, after }),
            },
            None => attempt.await,
        };

        match outcome {
            Ok(value) => return Ok(value),

            Err(e) if e.is_retryable() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy
                    .base_delay
                    .saturating_mul(2u32.saturating_pow(retries - 1));

                warn!(
                    "task '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                    task, retries, policy.max_retries, delay, e
                );

                tokio::time::sleep(delay).await;
            }

            Err(source) if source.is_retryable() && retries > 0 => {
                return Err(EngineError::RetryExhausted {
                    task,
                    attempts: retries + 1,
                    source,
                });
            }

            Err(source) => return Err(EngineError::TaskFailed { task, source }),
        }
    }
}
