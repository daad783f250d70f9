//! Capability contract for anything a worker can queue.

use async_trait::async_trait;

use crate::error::TaskError;
use crate::worker::state::{Progress, State, Weight};

/// A unit of work that can be queued on a [`Worker`](crate::worker::Worker).
///
/// The worker serializes calls to [`run`](Runnable::run); implementations do
/// not need to guard against concurrent runs. Progress is binary: either
/// [`MIN_PROGRESS`](crate::worker::MIN_PROGRESS) or
/// [`MAX_PROGRESS`](crate::worker::MAX_PROGRESS).
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Execute the work once, to completion.
    ///
    /// The unit ends in [`State::Finished`] whether or not the work succeeded.
    async fn run(&self) -> Result<(), TaskError>;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn state(&self) -> State;

    fn progress(&self) -> Progress;

    fn weight(&self) -> Weight;

    /// Integer-truncated contribution: `floor(progress * weight / 100)`.
    fn work_load(&self) -> u64;

    /// Return to [`State::Waiting`]. Fails while running.
    fn reset(&self) -> Result<(), TaskError>;
}
