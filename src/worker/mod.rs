//! Worker system — sequential execution of weighted tasks.
//!
//! Core components:
//! - `state` — State vocabulary (Waiting → Running → Finished/Canceled/Timeout)
//! - `runnable` — Capability contract for queueable work
//! - `task` — Stock task wrapping a function and its argument
//! - `events` — Lifecycle events broadcast to observers
//! - `worker` — Run loop, control surface and progress aggregation

pub mod events;
pub mod runnable;
pub mod state;
pub mod task;
pub mod worker;

pub use events::WorkerEvent;
pub use runnable::Runnable;
pub use state::{MAX_PROGRESS, MIN_PROGRESS, Progress, State, StateTransition, Weight};
pub use task::Task;
pub use worker::Worker;
