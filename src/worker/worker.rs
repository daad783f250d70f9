//! Sequential execution engine driving a queue of runnables.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{TaskError, WorkerError};
use crate::worker::events::WorkerEvent;
use crate::worker::runnable::Runnable;
use crate::worker::state::{
    MAX_PROGRESS, MIN_PROGRESS, Progress, ProgressCell, State, StateCell, StateTransition,
};

/// Cap on the recorded transition history.
const MAX_TRANSITIONS: usize = 200;

/// Task executing on the background path.
struct CurrentTask {
    index: usize,
    task: Arc<dyn Runnable>,
}

/// Wall-clock bookkeeping of the latest run cycle.
#[derive(Debug, Default, Clone, Copy)]
struct RunClock {
    started_at: Option<Instant>,
    deadline: Option<Instant>,
    ended_at: Option<Instant>,
}

/// Signals armed once per run cycle.
struct RunCycle {
    run_id: Uuid,
    cancel: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
}

/// State shared between the caller's handle and the background path.
struct Shared {
    name: String,
    state: StateCell,
    progress: ProgressCell,
    /// Insertion order is execution order.
    queue: RwLock<Vec<Arc<dyn Runnable>>>,
    current: RwLock<Option<CurrentTask>>,
    clock: RwLock<RunClock>,
    cycle: RwLock<Option<RunCycle>>,
    last_error: RwLock<Option<WorkerError>>,
    transitions: RwLock<Vec<StateTransition>>,
    events: broadcast::Sender<WorkerEvent>,
}

/// Runs an ordered queue of tasks one after another on a background task.
///
/// The handle is cheap to clone; clones control the same worker. The queue
/// can only be changed while the worker is not running. Cancellation and the
/// deadline are checked between tasks only: a task that has started always
/// runs to completion.
#[derive(Clone)]
pub struct Worker {
    shared: Arc<Shared>,
}

impl Worker {
    /// Create a new worker with default settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(&WorkerConfig {
            name: name.into(),
            ..WorkerConfig::default()
        })
    }

    /// Create a new worker from configuration.
    pub fn with_config(config: &WorkerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                name: config.name.clone(),
                state: StateCell::new(State::Waiting),
                progress: ProgressCell::new(MIN_PROGRESS),
                queue: RwLock::new(Vec::new()),
                current: RwLock::new(None),
                clock: RwLock::new(RunClock::default()),
                cycle: RwLock::new(None),
                last_error: RwLock::new(None),
                transitions: RwLock::new(Vec::new()),
                events,
            }),
        }
    }

    /// Start executing the queue on a background task.
    ///
    /// A `deadline` of `None` or zero disables the timeout. An empty queue is
    /// accepted and leaves the worker untouched. Must be called from within a
    /// Tokio runtime.
    pub async fn run(&self, deadline: Option<Duration>) -> Result<(), WorkerError> {
        let shared = &self.shared;
        // The write lock serializes run against queue edits and resets.
        let queue = shared.queue.write().await;

        match shared.state.load() {
            State::Running => return Err(WorkerError::AlreadyRunning),
            state if state.is_terminal() => return Err(WorkerError::AlreadyFinished),
            _ => {}
        }

        if queue.is_empty() {
            debug!(worker = %shared.name, "Run requested on empty queue, nothing to do");
            return Ok(());
        }

        let tasks = queue.clone();
        let run_id = Uuid::new_v4();
        let started_at = Instant::now();
        let deadline = deadline.filter(|d| !d.is_zero());
        // A deadline past the clock's range never fires.
        let deadline_at = deadline.and_then(|d| started_at.checked_add(d));
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = watch::channel(false);

        *shared.clock.write().await = RunClock {
            started_at: Some(started_at),
            deadline: deadline_at,
            ended_at: None,
        };
        *shared.cycle.write().await = Some(RunCycle {
            run_id,
            cancel: Arc::clone(&cancel),
            done: done_rx,
        });
        *shared.last_error.write().await = None;
        *shared.current.write().await = None;

        shared.emit(WorkerEvent::RunStarted {
            run_id,
            tasks: tasks.len(),
            deadline_ms: deadline
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        });
        shared
            .transition_to(State::Running, Some(run_id), "Run requested")
            .await;
        drop(queue);

        info!(
            worker = %shared.name,
            run_id = %run_id,
            tasks = tasks.len(),
            deadline = ?deadline,
            "Worker starting"
        );

        let background = Arc::clone(shared);
        tokio::spawn(async move {
            background.run_loop(run_id, tasks, cancel, done_tx).await;
        });

        Ok(())
    }

    /// Wait until the background task has exited.
    ///
    /// Returns the recorded outcome of the run: cancellation, timeout, or the
    /// first task failure. Only valid while the worker is running.
    pub async fn wait(&self) -> Result<(), WorkerError> {
        if !self.is_running() {
            return Err(WorkerError::NotRunning);
        }

        let mut done = match self.shared.cycle.read().await.as_ref() {
            Some(cycle) => cycle.done.clone(),
            None => return Err(WorkerError::NotRunning),
        };

        if done.wait_for(|finished| *finished).await.is_err() {
            warn!(worker = %self.shared.name, "Run loop exited without signalling completion");
        }

        match self.shared.last_error.read().await.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Request cancellation. Takes effect before the next task starts.
    pub async fn stop(&self) -> Result<(), WorkerError> {
        if !self.is_running() {
            return Err(WorkerError::NotRunning);
        }

        if let Some(cycle) = self.shared.cycle.read().await.as_ref() {
            cycle.cancel.store(true, Ordering::Release);
            info!(worker = %self.shared.name, run_id = %cycle.run_id, "Cancellation requested");
        }
        Ok(())
    }

    /// Return to [`State::Waiting`] and reset every queued task.
    pub async fn reset(&self) -> Result<(), WorkerError> {
        let shared = &self.shared;
        let queue = shared.queue.write().await;

        if shared.state.load() == State::Running {
            return Err(WorkerError::AlreadyRunning);
        }

        let mut refused = None;
        for task in queue.iter() {
            if let Err(e) = task.reset() {
                warn!(worker = %shared.name, task = %task.name(), "Task refused to reset");
                refused.get_or_insert(e);
            }
        }

        shared.progress.store(MIN_PROGRESS);
        *shared.last_error.write().await = None;
        *shared.current.write().await = None;

        if shared.state.load() != State::Waiting {
            shared.transition_to(State::Waiting, None, "Reset").await;
        }

        match refused {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Append a task to the queue.
    pub async fn add_task(&self, task: Arc<dyn Runnable>) -> Result<(), WorkerError> {
        let mut queue = self.shared.queue.write().await;
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }
        queue.push(task);
        Ok(())
    }

    /// Append several tasks to the queue, keeping their order.
    pub async fn add_tasks<I>(&self, tasks: I) -> Result<(), WorkerError>
    where
        I: IntoIterator<Item = Arc<dyn Runnable>>,
    {
        let mut queue = self.shared.queue.write().await;
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }
        queue.extend(tasks);
        Ok(())
    }

    /// Empty the queue.
    pub async fn clear_tasks(&self) -> Result<(), WorkerError> {
        let mut queue = self.shared.queue.write().await;
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }
        queue.clear();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> State {
        self.shared.state.load()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == State::Waiting
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state() == State::Finished
    }

    /// Number of queued tasks.
    pub async fn amount_subtasks(&self) -> usize {
        self.shared.queue.read().await.len()
    }

    /// Snapshot of the queue.
    pub async fn subtasks(&self) -> Vec<Arc<dyn Runnable>> {
        self.shared.queue.read().await.clone()
    }

    /// Weighted progress over all tasks in percent.
    ///
    /// Recomputed while running; otherwise the last computed value.
    pub async fn progress(&self) -> Progress {
        if self.is_running() {
            return aggregate_progress(&self.shared.queue.read().await);
        }
        self.shared.progress.load()
    }

    /// Sum of all task weights, independent of progress.
    pub async fn total_work_load(&self) -> f64 {
        self.shared
            .queue
            .read()
            .await
            .iter()
            .map(|task| task.weight())
            .sum()
    }

    /// Weight of the work not yet done, from live task progress.
    pub async fn remaining_work_load(&self) -> f64 {
        self.shared
            .queue
            .read()
            .await
            .iter()
            .map(|task| (1.0 - task.progress() / MAX_PROGRESS) * task.weight())
            .sum()
    }

    /// Seconds since the worker was started.
    ///
    /// Once a run has ended the value is frozen at the terminal transition.
    pub async fn duration(&self) -> Result<f64, WorkerError> {
        if self.state() == State::Waiting {
            return Err(WorkerError::NotStarted);
        }

        let clock = *self.shared.clock.read().await;
        let started_at = clock.started_at.ok_or(WorkerError::NotStarted)?;
        let end = clock.ended_at.unwrap_or_else(Instant::now);
        Ok(end.saturating_duration_since(started_at).as_secs_f64())
    }

    /// Seconds until the deadline; negative once it has passed, `-1` if none is set.
    pub async fn remaining_time(&self) -> Result<f64, WorkerError> {
        if !self.is_running() {
            return Err(WorkerError::NotRunning);
        }

        let Some(deadline) = self.shared.clock.read().await.deadline else {
            return Ok(-1.0);
        };

        let now = Instant::now();
        Ok(if deadline >= now {
            (deadline - now).as_secs_f64()
        } else {
            -(now - deadline).as_secs_f64()
        })
    }

    /// Name of the task currently executing.
    pub async fn current_task_name(&self) -> Result<String, WorkerError> {
        self.with_current_task(|task| task.name().to_string()).await
    }

    /// Description of the task currently executing.
    pub async fn current_task_desc(&self) -> Result<String, WorkerError> {
        self.with_current_task(|task| task.description().to_string())
            .await
    }

    /// Queue index of the task currently executing.
    pub async fn current_task_index(&self) -> Result<usize, WorkerError> {
        match self.shared.current.read().await.as_ref() {
            Some(current) if self.is_running() => Ok(current.index),
            _ => Err(WorkerError::NotRunning),
        }
    }

    async fn with_current_task<T>(
        &self,
        f: impl FnOnce(&dyn Runnable) -> T,
    ) -> Result<T, WorkerError> {
        let task = match self.shared.current.read().await.as_ref() {
            Some(current) if self.is_running() => Arc::clone(&current.task),
            _ => return Err(WorkerError::NotRunning),
        };
        if self.shared.queue.read().await.is_empty() {
            return Err(WorkerError::TaskQueueEmpty);
        }
        Ok(f(task.as_ref()))
    }

    /// Outcome recorded by the latest run, if any.
    pub async fn last_error(&self) -> Option<WorkerError> {
        self.shared.last_error.read().await.clone()
    }

    /// Recorded state changes, oldest first.
    pub async fn transitions(&self) -> Vec<StateTransition> {
        self.shared.transitions.read().await.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.shared.events.subscribe()
    }
}

impl Shared {
    async fn run_loop(
        self: Arc<Self>,
        run_id: Uuid,
        tasks: Vec<Arc<dyn Runnable>>,
        cancel: Arc<AtomicBool>,
        done: watch::Sender<bool>,
    ) {
        let last = tasks.len() - 1;
        let mut first_failure: Option<TaskError> = None;

        for (index, task) in tasks.iter().enumerate() {
            if cancel.load(Ordering::Acquire) {
                self.finish(run_id, State::Canceled, Some(WorkerError::CanceledByUser))
                    .await;
                break;
            }

            self.progress.store(aggregate_progress(&tasks));

            if self.deadline_elapsed().await {
                self.finish(run_id, State::TimeoutReached, Some(WorkerError::TimeoutReached))
                    .await;
                break;
            }

            *self.current.write().await = Some(CurrentTask {
                index,
                task: Arc::clone(task),
            });
            debug!(worker = %self.name, task = %task.name(), index, "Starting task");
            self.emit(WorkerEvent::TaskStarted {
                run_id,
                index,
                name: task.name().to_string(),
            });

            if let Err(e) = task.run().await {
                self.emit(WorkerEvent::TaskFailed {
                    run_id,
                    index,
                    name: task.name().to_string(),
                    reason: e.to_string(),
                });
                first_failure.get_or_insert(e);
            }

            let progress = aggregate_progress(&tasks);
            self.progress.store(progress);
            debug!(worker = %self.name, task = %task.name(), index, progress, "Task finished");
            self.emit(WorkerEvent::TaskFinished {
                run_id,
                index,
                name: task.name().to_string(),
                progress,
            });

            if index == last {
                let outcome = first_failure.take().map(WorkerError::from);
                self.finish(run_id, State::Finished, outcome).await;
            }
        }

        done.send_replace(true);
    }

    /// Record the terminal outcome of a run, then change state.
    async fn finish(&self, run_id: Uuid, to: State, outcome: Option<WorkerError>) {
        self.clock.write().await.ended_at = Some(Instant::now());
        let reason = match &outcome {
            Some(error) => error.to_string(),
            None => "All tasks completed".to_string(),
        };
        *self.last_error.write().await = outcome;
        self.transition_to(to, Some(run_id), &reason).await;
    }

    async fn deadline_elapsed(&self) -> bool {
        self.clock
            .read()
            .await
            .deadline
            .is_some_and(|deadline| Instant::now() > deadline)
    }

    async fn transition_to(&self, to: State, run_id: Option<Uuid>, reason: &str) {
        let from = self.state.load();
        if !from.can_transition_to(to) {
            warn!(worker = %self.name, %from, %to, "Ignoring invalid state transition");
            return;
        }

        {
            let mut transitions = self.transitions.write().await;
            transitions.push(StateTransition::new(from, to, Some(reason.to_string())));
            if transitions.len() > MAX_TRANSITIONS {
                let drain_count = transitions.len() - MAX_TRANSITIONS;
                transitions.drain(..drain_count);
            }
        }

        self.state.store(to);

        if to.is_terminal() {
            info!(worker = %self.name, state = %to, reason, "Worker stopped");
        } else {
            debug!(worker = %self.name, %from, %to, "Worker state changed");
        }
        self.emit(WorkerEvent::StateChanged { run_id, from, to });
    }

    fn emit(&self, event: WorkerEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

/// `100 * Σ(weight * done) / Σ weight`, where `done` is 1 for finished tasks.
fn aggregate_progress(tasks: &[Arc<dyn Runnable>]) -> Progress {
    let mut total = 0.0;
    let mut done = 0.0;
    let mut all_done = !tasks.is_empty();

    for task in tasks {
        let finished = (task.progress() / MAX_PROGRESS).trunc();
        total += task.weight();
        done += finished * task.weight();
        all_done &= finished >= 1.0;
    }

    if total > 0.0 {
        done / total * MAX_PROGRESS
    } else if all_done {
        MAX_PROGRESS
    } else {
        MIN_PROGRESS
    }
}
