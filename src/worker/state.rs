//! State machine vocabulary shared by tasks and workers.

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseStateError;

/// Percent complete, from [`MIN_PROGRESS`] to [`MAX_PROGRESS`].
pub type Progress = f64;

/// Relative cost of a task. A weight of 1 resembles roughly one second of work.
pub type Weight = f64;

/// Minimum progress value in percent.
pub const MIN_PROGRESS: Progress = 0.0;

/// Maximum progress value in percent.
pub const MAX_PROGRESS: Progress = 100.0;

/// State of a task or a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum State {
    /// Ready to start. Initial state and the state after a reset.
    #[serde(rename = "WAITING")]
    Waiting = 0,
    /// Currently executing.
    #[serde(rename = "RUNNING")]
    Running = 1,
    /// Stopped by the user before the queue was exhausted.
    #[serde(rename = "CANCELED")]
    Canceled = 2,
    /// Every task completed. Call reset to run again.
    #[serde(rename = "FINISHED")]
    Finished = 3,
    /// The deadline elapsed before the queue was exhausted.
    #[serde(rename = "TIMEOUT")]
    TimeoutReached = 4,
}

impl State {
    /// Canonical label used for presentation and logging.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Canceled => "CANCELED",
            Self::Finished => "FINISHED",
            Self::TimeoutReached => "TIMEOUT",
        }
    }

    /// Check if this is a terminal state of a run cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Finished | Self::TimeoutReached)
    }

    /// Check if a worker may move from this state to `target`.
    pub fn can_transition_to(&self, target: State) -> bool {
        use State::*;

        matches!(
            (self, target),
            (Waiting, Running)
                | (Running, Canceled)
                | (Running, Finished)
                | (Running, TimeoutReached)
                | (Canceled, Waiting)
                | (Finished, Waiting)
                | (TimeoutReached, Waiting)
        )
    }

    fn from_repr(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Canceled,
            3 => Self::Finished,
            4 => Self::TimeoutReached,
            _ => Self::Waiting,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

impl FromStr for State {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(Self::Waiting),
            "RUNNING" => Ok(Self::Running),
            "CANCELED" => Ok(Self::Canceled),
            "FINISHED" => Ok(Self::Finished),
            "TIMEOUT" => Ok(Self::TimeoutReached),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// Lock-free holder for a [`State`], readable from any thread.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> State {
        State::from_repr(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: State) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Lock-free holder for a [`Progress`] value.
#[derive(Debug)]
pub(crate) struct ProgressCell(AtomicU64);

impl ProgressCell {
    pub(crate) fn new(progress: Progress) -> Self {
        Self(AtomicU64::new(progress.to_bits()))
    }

    pub(crate) fn load(&self) -> Progress {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, progress: Progress) {
        self.0.store(progress.to_bits(), Ordering::Release);
    }
}

/// A recorded worker state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state.
    pub from: State,
    /// New state.
    pub to: State,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
    /// Reason for the transition.
    pub reason: Option<String>,
}

impl StateTransition {
    pub(crate) fn new(from: State, to: State, reason: Option<String>) -> Self {
        Self {
            from,
            to,
            timestamp: Utc::now(),
            reason,
        }
    }
}
