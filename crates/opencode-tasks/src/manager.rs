//! The background task manager.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opencode_core::{SessionId, TaskId, TaskSnapshot, TaskStatus};
use opencode_events::{Event, EventBus};
use opencode_security::ResolvedSecurityConfig;
use tracing::{debug, info, warn};

use crate::config::{TaskManagerConfig, TaskManagerConfigPatch};

/// Executor invoked for each dispatched task.
///
/// Resolution maps to [`TaskManager::complete`], rejection to
/// [`TaskManager::fail`]. Executors run concurrently with the manager
/// and talk back only through its public transition operations.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run the task to completion.
    async fn execute(&self, task: TaskSnapshot) -> Result<serde_json::Value, String>;
}

/// Host callbacks wired into the manager.
#[derive(Clone, Default)]
pub struct TaskCallbacks {
    /// Executor used for tasks created without a per-task executor.
    pub on_execute: Option<Arc<dyn TaskExecutor>>,
    /// Invoked when a delegated session is associated with a task.
    pub on_subagent_session_created: Option<Arc<dyn Fn(&TaskId, &SessionId) + Send + Sync>>,
    /// Invoked at the end of shutdown.
    pub on_shutdown: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl std::fmt::Debug for TaskCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCallbacks")
            .field("on_execute", &self.on_execute.is_some())
            .field(
                "on_subagent_session_created",
                &self.on_subagent_session_created.is_some(),
            )
            .field("on_shutdown", &self.on_shutdown.is_some())
            .finish()
    }
}

/// Input to [`TaskManager::create`].
#[derive(Clone, Default)]
pub struct CreateTaskInput {
    /// Short human description.
    pub description: Option<String>,
    /// Provider concurrency key.
    pub provider: Option<String>,
    /// Model concurrency key.
    pub model: Option<String>,
    /// Delegation category.
    pub category: Option<String>,
    /// Session the task will execute in, when already known.
    pub session_id: Option<SessionId>,
    /// Per-task executor; falls back to the global `on_execute`.
    pub executor: Option<Arc<dyn TaskExecutor>>,
}

impl std::fmt::Debug for CreateTaskInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateTaskInput")
            .field("description", &self.description)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("category", &self.category)
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}

/// Internal task record: the snapshot fields plus the executor.
struct TaskRecord {
    description: Option<String>,
    status: TaskStatus,
    provider: Option<String>,
    model: Option<String>,
    category: Option<String>,
    session_id: Option<SessionId>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    executor: Option<Arc<dyn TaskExecutor>>,
}

impl TaskRecord {
    fn snapshot(&self, id: &TaskId) -> TaskSnapshot {
        TaskSnapshot {
            id: id.clone(),
            description: self.description.clone(),
            status: self.status,
            provider: self.provider.clone(),
            model: self.model.clone(),
            category: self.category.clone(),
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

struct State {
    tasks: BTreeMap<TaskId, TaskRecord>,
    queue: VecDeque<TaskId>,
    config: TaskManagerConfig,
    callbacks: TaskCallbacks,
    security: Option<Arc<ResolvedSecurityConfig>>,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

impl State {
    fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            queue: VecDeque::new(),
            config: TaskManagerConfig::default(),
            callbacks: TaskCallbacks::default(),
            security: None,
            sweeper: None,
        }
    }

    fn running_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .count()
    }

    fn running_with<F: Fn(&TaskRecord) -> bool>(&self, pred: F) -> usize {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running && pred(t))
            .count()
    }

    /// Whether a queued task passes its per-provider and per-model
    /// caps. The default cap is checked by the dispatch loop.
    fn eligible(&self, id: &TaskId) -> bool {
        let Some(record) = self.tasks.get(id) else {
            return false;
        };

        if let Some(provider) = record.provider.as_deref() {
            if let Some(&limit) = self.config.provider_concurrency.get(provider) {
                if self.running_with(|t| t.provider.as_deref() == Some(provider)) >= limit {
                    return false;
                }
            }
        }

        if let Some(model) = record.model.as_deref() {
            if let Some(&limit) = self.config.model_concurrency.get(model) {
                if self.running_with(|t| t.model.as_deref() == Some(model)) >= limit {
                    return false;
                }
            }
        }

        true
    }
}

struct Inner {
    state: Mutex<State>,
    events: EventBus,
}

/// The background task manager.
///
/// All state lives behind one mutex; public operations are synchronous
/// and the lock is always released before events are published or
/// executors invoked, so subscribers and executors may call back into
/// the manager freely.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    /// Create a manager with its own event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::with_events(EventBus::new())
    }

    /// Create a manager publishing on an existing bus.
    #[must_use]
    pub fn with_events(events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new()),
                events,
            }),
        }
    }

    /// The bus this manager publishes on.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().expect("task manager lock poisoned")
    }

    /// Create a task, queue it, and run a dispatch pass.
    ///
    /// Must be called from within a tokio runtime when an executor is
    /// configured, since dispatched executors are spawned.
    pub fn create(&self, input: CreateTaskInput) -> TaskSnapshot {
        let id = TaskId::new();
        let record = TaskRecord {
            description: input.description,
            status: TaskStatus::Pending,
            provider: input.provider,
            model: input.model,
            category: input.category,
            session_id: input.session_id,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            executor: input.executor,
        };
        let snapshot = record.snapshot(&id);

        {
            let mut state = self.state();
            state.tasks.insert(id.clone(), record);
        }

        info!(task_id = %id, "task created");
        self.inner.events.publish(Event::TaskCreated {
            task: snapshot.clone(),
        });

        {
            let mut state = self.state();
            state.queue.push_back(id);
        }
        self.dispatch();

        snapshot
    }

    /// Dispatch pass: start queued tasks until the default cap is
    /// saturated or no queued task passes its per-key caps. A task
    /// blocked by its own cap does not block later candidates.
    fn dispatch(&self) {
        let mut started: Vec<(TaskSnapshot, Option<Arc<dyn TaskExecutor>>)> = Vec::new();

        {
            let mut state = self.state();
            loop {
                if state.running_count() >= state.config.default_concurrency {
                    break;
                }
                let Some(pos) = state.queue.iter().position(|id| state.eligible(id)) else {
                    break;
                };
                let Some(id) = state.queue.remove(pos) else {
                    break;
                };
                let executor = state.callbacks.on_execute.clone();
                let Some(record) = state.tasks.get_mut(&id) else {
                    continue;
                };
                record.status = TaskStatus::Running;
                record.started_at = Some(Utc::now());
                let executor = record.executor.clone().or(executor);
                started.push((record.snapshot(&id), executor));
            }
        }

        for (snapshot, executor) in started {
            debug!(task_id = %snapshot.id, "task started");
            self.inner.events.publish(Event::TaskStarted {
                task: snapshot.clone(),
            });

            // A missing executor leaves the task running for the host
            // to complete externally.
            if let Some(executor) = executor {
                let manager = self.clone();
                let id = snapshot.id.clone();
                tokio::spawn(async move {
                    match executor.execute(snapshot).await {
                        Ok(value) => manager.complete(&id, Some(value)),
                        Err(message) => manager.fail(&id, &message),
                    }
                });
            }
        }
    }

    /// Transition a running task to completed. A no-op for any other
    /// state.
    pub fn complete(&self, id: &TaskId, result: Option<serde_json::Value>) {
        let snapshot = {
            let mut state = self.state();
            let Some(record) = state.tasks.get_mut(id) else {
                return;
            };
            if record.status != TaskStatus::Running {
                return;
            }
            record.status = TaskStatus::Completed;
            record.completed_at = Some(Utc::now());
            record.result = result;
            record.snapshot(id)
        };

        info!(task_id = %id, "task completed");
        self.inner.events.publish(Event::TaskCompleted { task: snapshot });
        self.dispatch();
    }

    /// Transition a running task to failed. A no-op for any other
    /// state.
    pub fn fail(&self, id: &TaskId, error: &str) {
        let snapshot = {
            let mut state = self.state();
            let Some(record) = state.tasks.get_mut(id) else {
                return;
            };
            if record.status != TaskStatus::Running {
                return;
            }
            record.status = TaskStatus::Failed;
            record.completed_at = Some(Utc::now());
            record.error = Some(error.to_owned());
            record.snapshot(id)
        };

        warn!(task_id = %id, error, "task failed");
        self.inner.events.publish(Event::TaskFailed { task: snapshot });
        self.dispatch();
    }

    /// Cancel a pending or running task. Terminal tasks are untouched.
    pub fn cancel(&self, id: &TaskId) {
        let snapshot = {
            let mut state = self.state();
            let Some(record) = state.tasks.get_mut(id) else {
                return;
            };
            if record.status.is_terminal() {
                return;
            }
            record.status = TaskStatus::Cancelled;
            record.completed_at = Some(Utc::now());
            let snapshot = record.snapshot(id);
            state.queue.retain(|queued| queued != id);
            snapshot
        };

        info!(task_id = %id, "task cancelled");
        self.inner.events.publish(Event::TaskCancelled { task: snapshot });
        self.dispatch();
    }

    /// Snapshot of one task.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<TaskSnapshot> {
        let state = self.state();
        state.tasks.get(id).map(|record| record.snapshot(id))
    }

    /// Snapshots of all tasks in creation order.
    #[must_use]
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let state = self.state();
        state
            .tasks
            .iter()
            .map(|(id, record)| record.snapshot(id))
            .collect()
    }

    /// Snapshots of currently running tasks.
    #[must_use]
    pub fn running_tasks(&self) -> Vec<TaskSnapshot> {
        self.list_with_status(TaskStatus::Running)
    }

    /// Snapshots of queued tasks.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<TaskSnapshot> {
        self.list_with_status(TaskStatus::Pending)
    }

    fn list_with_status(&self, status: TaskStatus) -> Vec<TaskSnapshot> {
        let state = self.state();
        state
            .tasks
            .iter()
            .filter(|(_, record)| record.status == status)
            .map(|(id, record)| record.snapshot(id))
            .collect()
    }

    /// Apply a partial configuration update, then re-dispatch (a raised
    /// cap may unblock queued tasks).
    pub fn configure(&self, patch: TaskManagerConfigPatch) {
        {
            let mut state = self.state();
            state.config.apply(patch);
        }
        self.dispatch();
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> TaskManagerConfig {
        self.state().config.clone()
    }

    /// Install host callbacks, then re-dispatch.
    pub fn set_callbacks(&self, callbacks: TaskCallbacks) {
        {
            let mut state = self.state();
            state.callbacks = callbacks;
        }
        self.dispatch();
    }

    /// Retain an immutable security snapshot for delegated children.
    pub fn set_security_config(&self, config: Arc<ResolvedSecurityConfig>) {
        let mut state = self.state();
        state.security = Some(config);
    }

    /// The retained security snapshot. Every call returns a clone of
    /// the same `Arc`, so children inherit the parent's snapshot by
    /// identity.
    #[must_use]
    pub fn security_config(&self) -> Option<Arc<ResolvedSecurityConfig>> {
        self.state().security.clone()
    }

    /// Record the session a task executes in and notify the host.
    pub fn attach_session(&self, id: &TaskId, session: SessionId) {
        let callback = {
            let mut state = self.state();
            let Some(record) = state.tasks.get_mut(id) else {
                return;
            };
            if record.status.is_terminal() {
                return;
            }
            record.session_id = Some(session.clone());
            state.callbacks.on_subagent_session_created.clone()
        };

        if let Some(callback) = callback {
            callback(id, &session);
        }
    }

    /// Fail every running task older than the stale timeout. Returns
    /// the number of tasks reaped.
    pub fn cleanup_stale_tasks(&self) -> usize {
        let (timeout_ms, stale): (u64, Vec<TaskSnapshot>) = {
            let mut state = self.state();
            let timeout_ms = state.config.stale_timeout_ms;
            let now = Utc::now();
            let mut reaped = Vec::new();

            let stale_ids: Vec<TaskId> = state
                .tasks
                .iter()
                .filter(|(_, record)| {
                    record.status == TaskStatus::Running
                        && record.started_at.is_some_and(|started| {
                            let age = now.signed_duration_since(started);
                            age.num_milliseconds() >= i64::try_from(timeout_ms).unwrap_or(i64::MAX)
                        })
                })
                .map(|(id, _)| id.clone())
                .collect();

            for id in stale_ids {
                if let Some(record) = state.tasks.get_mut(&id) {
                    record.status = TaskStatus::Failed;
                    record.completed_at = Some(now);
                    record.error = Some(format!("Task stale: exceeded {timeout_ms}ms timeout"));
                    reaped.push(record.snapshot(&id));
                }
            }
            (timeout_ms, reaped)
        };

        let count = stale.len();
        for snapshot in stale {
            warn!(task_id = %snapshot.id, timeout_ms, "stale task reaped");
            self.inner.events.publish(Event::TaskFailed { task: snapshot });
        }
        if count > 0 {
            self.dispatch();
        }
        count
    }

    /// Arm the periodic stale sweep. Idempotent: a second call while a
    /// sweep is armed is a no-op. Must be called from within a tokio
    /// runtime.
    pub fn start_stale_detection(&self) {
        let mut state = self.state();
        if state.sweeper.is_some() {
            return;
        }

        let period_ms = state.config.stale_timeout_ms.min(60_000);
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(period_ms));
            // The first tick fires immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                TaskManager { inner }.cleanup_stale_tasks();
            }
        });
        state.sweeper = Some(handle);
        debug!(period_ms, "stale detection armed");
    }

    /// Tear the manager down.
    ///
    /// Stops the stale sweep. Unless `persist_on_exit` is set, every
    /// pending and running task is cancelled with the current time as
    /// its completion time. The `on_shutdown` callback runs last; the
    /// security snapshot is left in place either way.
    pub fn shutdown(&self) {
        let (cancelled, on_shutdown): (Vec<TaskSnapshot>, _) = {
            let mut state = self.state();
            if let Some(sweeper) = state.sweeper.take() {
                sweeper.abort();
            }

            let mut cancelled = Vec::new();
            if !state.config.persist_on_exit {
                let now = Utc::now();
                let open_ids: Vec<TaskId> = state
                    .tasks
                    .iter()
                    .filter(|(_, record)| !record.status.is_terminal())
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in open_ids {
                    if let Some(record) = state.tasks.get_mut(&id) {
                        record.status = TaskStatus::Cancelled;
                        record.completed_at = Some(now);
                        cancelled.push(record.snapshot(&id));
                    }
                }
                state.queue.clear();
            }

            (cancelled, state.callbacks.on_shutdown.clone())
        };

        for snapshot in cancelled {
            self.inner.events.publish(Event::TaskCancelled { task: snapshot });
        }

        info!("task manager shut down");
        if let Some(on_shutdown) = on_shutdown {
            on_shutdown();
        }
    }

    /// Drop all state and restore defaults. Test scaffolding only.
    pub fn reset(&self) {
        let mut state = self.state();
        if let Some(sweeper) = state.sweeper.take() {
            sweeper.abort();
        }
        state.tasks.clear();
        state.queue.clear();
        state.config = TaskManagerConfig::default();
        state.callbacks = TaskCallbacks::default();
        state.security = None;
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().expect("task manager lock poisoned");
        f.debug_struct("TaskManager")
            .field("tasks", &state.tasks.len())
            .field("queued", &state.queue.len())
            .finish_non_exhaustive()
    }
}
