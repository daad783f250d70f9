//! Error types for the task sequencer.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by a single unit of work.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("Task {name} already running")]
    Running { name: String },

    #[error("Task {name} failed: {reason}")]
    Failed { name: String, reason: String },
}

/// Errors raised by the worker control surface and recorded as run outcomes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker already running, can not change task queue")]
    AlreadyRunning,

    #[error("Worker was not started and is still in waiting state")]
    NotStarted,

    #[error("Worker is not running")]
    NotRunning,

    #[error("Worker task queue is empty")]
    TaskQueueEmpty,

    #[error("Worker already finished")]
    AlreadyFinished,

    #[error("Worker reached timeout limit")]
    TimeoutReached,

    #[error("Worker was canceled by user")]
    CanceledByUser,

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Raised when a label does not name a known state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unknown state label: {0}")]
pub struct ParseStateError(pub String);

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
