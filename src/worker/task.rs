//! Stock unit of work wrapping a user-supplied function and its argument.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};

use crate::error::TaskError;
use crate::worker::runnable::Runnable;
use crate::worker::state::{MAX_PROGRESS, MIN_PROGRESS, Progress, State, StateCell, Weight};

type BlockingWork<A> = Arc<dyn Fn(&A) -> anyhow::Result<()> + Send + Sync>;
type AsyncWork<A> = Arc<dyn Fn(Arc<A>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

enum Work<A> {
    /// Runs on the blocking thread pool.
    Blocking(BlockingWork<A>),
    /// Awaited on the runtime.
    Async(AsyncWork<A>),
}

/// A named, weighted unit of work with binary progress.
///
/// Any value the work produces must be handed back through the argument
/// (for example a shared `Mutex` or channel sender).
pub struct Task<A> {
    name: String,
    description: String,
    weight: Weight,
    state: StateCell,
    work: Work<A>,
    arg: Arc<A>,
    last_error: Mutex<Option<TaskError>>,
}

impl<A> Task<A>
where
    A: Send + Sync + 'static,
{
    /// Create a task around a blocking function.
    pub fn new<F>(
        name: impl Into<String>,
        weight: Weight,
        description: impl Into<String>,
        work: F,
        arg: A,
    ) -> Self
    where
        F: Fn(&A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::with_work(name, weight, description, Work::Blocking(Arc::new(work)), arg)
    }

    /// Create a task around an async function.
    pub fn new_async<F, Fut>(
        name: impl Into<String>,
        weight: Weight,
        description: impl Into<String>,
        work: F,
        arg: A,
    ) -> Self
    where
        F: Fn(Arc<A>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let work: AsyncWork<A> = Arc::new(move |arg| work(arg).boxed());
        Self::with_work(name, weight, description, Work::Async(work), arg)
    }

    fn with_work(
        name: impl Into<String>,
        weight: Weight,
        description: impl Into<String>,
        work: Work<A>,
        arg: A,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            weight,
            state: StateCell::new(State::Waiting),
            work,
            arg: Arc::new(arg),
            last_error: Mutex::new(None),
        }
    }

    /// The argument handed to the work function.
    pub fn arg(&self) -> &Arc<A> {
        &self.arg
    }

    /// Most recent failure of the work function, cleared by `reset`.
    pub fn last_error(&self) -> Option<TaskError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_error(&self, error: Option<TaskError>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    async fn execute(&self) -> anyhow::Result<()> {
        // A panicking work function surfaces as a task failure.
        let joined = match &self.work {
            Work::Blocking(work) => {
                let work = Arc::clone(work);
                let arg = Arc::clone(&self.arg);
                tokio::task::spawn_blocking(move || work(&arg)).await
            }
            Work::Async(work) => tokio::spawn(work(Arc::clone(&self.arg))).await,
        };

        joined.unwrap_or_else(|e| Err(anyhow::anyhow!("work function panicked: {e}")))
    }
}

#[async_trait]
impl<A> Runnable for Task<A>
where
    A: Send + Sync + 'static,
{
    async fn run(&self) -> Result<(), TaskError> {
        self.state.store(State::Running);

        let outcome = self.execute().await;

        self.state.store(State::Finished);

        match outcome {
            Ok(()) => {
                self.set_last_error(None);
                Ok(())
            }
            Err(e) => {
                let error = TaskError::Failed {
                    name: self.name.clone(),
                    reason: format!("{e:#}"),
                };
                tracing::warn!(task = %self.name, error = %e, "Task work function failed");
                self.set_last_error(Some(error.clone()));
                Err(error)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn state(&self) -> State {
        self.state.load()
    }

    /// Binary: a task is either not done or done.
    fn progress(&self) -> Progress {
        if self.state.load() == State::Finished {
            MAX_PROGRESS
        } else {
            MIN_PROGRESS
        }
    }

    fn weight(&self) -> Weight {
        self.weight
    }

    fn work_load(&self) -> u64 {
        (self.progress() * self.weight / MAX_PROGRESS).floor() as u64
    }

    fn reset(&self) -> Result<(), TaskError> {
        if self.state.load() == State::Running {
            return Err(TaskError::Running {
                name: self.name.clone(),
            });
        }
        self.state.store(State::Waiting);
        self.set_last_error(None);
        Ok(())
    }
}

impl<A> std::fmt::Debug for Task<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}
