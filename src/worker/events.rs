//! Events broadcast by a worker while it runs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::worker::state::{Progress, State};

/// Lifecycle events for observers of a [`Worker`](crate::worker::Worker).
///
/// Subscribers that fall behind lose the oldest events; the worker never
/// waits for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// A run cycle has been spawned.
    RunStarted {
        run_id: Uuid,
        tasks: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        deadline_ms: Option<u64>,
    },
    /// A queued task is about to execute.
    TaskStarted {
        run_id: Uuid,
        index: usize,
        name: String,
    },
    /// A queued task returned. `progress` is the worker's aggregate afterwards.
    TaskFinished {
        run_id: Uuid,
        index: usize,
        name: String,
        progress: Progress,
    },
    /// A queued task's work function returned an error or panicked.
    TaskFailed {
        run_id: Uuid,
        index: usize,
        name: String,
        reason: String,
    },
    /// The worker changed state.
    StateChanged {
        #[serde(skip_serializing_if = "Option::is_none")]
        run_id: Option<Uuid>,
        from: State,
        to: State,
    },
}

impl WorkerEvent {
    /// Get the run ID, if the event belongs to a run cycle.
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::TaskStarted { run_id, .. }
            | Self::TaskFinished { run_id, .. }
            | Self::TaskFailed { run_id, .. } => Some(*run_id),
            Self::StateChanged { run_id, .. } => *run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged() {
        let run_id = Uuid::new_v4();
        let event = WorkerEvent::StateChanged {
            run_id: Some(run_id),
            from: State::Running,
            to: State::TimeoutReached,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["to"], "TIMEOUT");
        assert_eq!(event.run_id(), Some(run_id));
    }

    #[test]
    fn run_started_omits_missing_deadline() {
        let event = WorkerEvent::RunStarted {
            run_id: Uuid::new_v4(),
            tasks: 3,
            deadline_ms: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("deadline_ms"));

        let parsed: WorkerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
