//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;
use crate::worker::Weight;

/// Environment variable holding the worker name.
pub const ENV_NAME: &str = "TASK_SEQUENCER_NAME";
/// Environment variable holding the deadline in milliseconds; `0` disables it.
pub const ENV_DEADLINE_MS: &str = "TASK_SEQUENCER_DEADLINE_MS";
/// Environment variable holding the event buffer size.
pub const ENV_EVENT_CAPACITY: &str = "TASK_SEQUENCER_EVENT_CAPACITY";
/// Environment variable holding the demo task plan.
pub const ENV_TASKS: &str = "TASK_SEQUENCER_TASKS";

/// Task plan used by the demo runner when none is configured.
pub const DEFAULT_TASK_PLAN: &str = "fetch:1:50,transform:2:50,publish:3:50";

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker name for identification in logs and events.
    pub name: String,
    /// Deadline for a whole run. `None` disables it.
    pub deadline: Option<Duration>,
    /// Number of events buffered per subscriber before the oldest are dropped.
    pub event_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "task-sequencer".to_string(),
            deadline: None,
            event_capacity: 64,
        }
    }
}

impl WorkerConfig {
    /// Build from `TASK_SEQUENCER_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_NAME).filter(|n| !n.trim().is_empty()) {
            config.name = name.trim().to_string();
        }

        if let Some(raw) = lookup(ENV_DEADLINE_MS) {
            let millis: u64 = parse_value(ENV_DEADLINE_MS, &raw)?;
            config.deadline = (millis > 0).then(|| Duration::from_millis(millis));
        }

        if let Some(raw) = lookup(ENV_EVENT_CAPACITY) {
            let capacity: usize = parse_value(ENV_EVENT_CAPACITY, &raw)?;
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    key: ENV_EVENT_CAPACITY.to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            config.event_capacity = capacity;
        }

        Ok(config)
    }
}

/// One entry of the demo runner's task plan.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPlan {
    pub name: String,
    pub weight: Weight,
    /// How long the task sleeps.
    pub duration: Duration,
}

/// Parse a comma-separated list of `name:weight:millis` entries.
pub fn parse_task_plan(raw: &str) -> Result<Vec<TaskPlan>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_task_entry)
        .collect()
}

fn parse_task_entry(entry: &str) -> Result<TaskPlan, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidValue {
        key: ENV_TASKS.to_string(),
        message: format!("{message} in entry '{entry}'"),
    };

    let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
    let [name, weight, millis] = parts.as_slice() else {
        return Err(invalid("expected name:weight:millis"));
    };

    if name.is_empty() {
        return Err(invalid("empty task name"));
    }
    let weight: Weight = weight.parse().map_err(|_| invalid("weight is not a number"))?;
    if !weight.is_finite() || weight <= 0.0 {
        return Err(invalid("weight must be positive"));
    }
    let millis: u64 = millis
        .parse()
        .map_err(|_| invalid("duration is not a whole number of milliseconds"))?;

    Ok(TaskPlan {
        name: name.to_string(),
        weight,
        duration: Duration::from_millis(millis),
    })
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("cannot parse '{raw}'"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.name, "task-sequencer");
        assert_eq!(config.deadline, None);
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn reads_overrides() {
        let config = WorkerConfig::from_lookup(lookup(&[
            (ENV_NAME, "nightly"),
            (ENV_DEADLINE_MS, "750"),
            (ENV_EVENT_CAPACITY, "8"),
        ]))
        .unwrap();
        assert_eq!(config.name, "nightly");
        assert_eq!(config.deadline, Some(Duration::from_millis(750)));
        assert_eq!(config.event_capacity, 8);
    }

    #[test]
    fn zero_deadline_disables_timeout() {
        let config = WorkerConfig::from_lookup(lookup(&[(ENV_DEADLINE_MS, "0")])).unwrap();
        assert_eq!(config.deadline, None);
    }

    #[test]
    fn rejects_bad_values() {
        let err = WorkerConfig::from_lookup(lookup(&[(ENV_DEADLINE_MS, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == ENV_DEADLINE_MS));

        let err = WorkerConfig::from_lookup(lookup(&[(ENV_EVENT_CAPACITY, "0")])).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn parses_default_plan() {
        let plan = parse_task_plan(DEFAULT_TASK_PLAN).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan[1],
            TaskPlan {
                name: "transform".to_string(),
                weight: 2.0,
                duration: Duration::from_millis(50),
            }
        );
    }

    #[test]
    fn plan_tolerates_whitespace_and_trailing_commas() {
        let plan = parse_task_plan(" a : 0.5 : 10 ,, b:1:0, ").unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].name, "a");
        assert_eq!(plan[0].weight, 0.5);
    }

    #[test]
    fn plan_rejects_malformed_entries() {
        assert!(parse_task_plan("a:1").is_err());
        assert!(parse_task_plan("a:heavy:10").is_err());
        assert!(parse_task_plan("a:-1:10").is_err());
        assert!(parse_task_plan(":1:10").is_err());
        assert!(parse_task_plan("a:1:1.5").is_err());
    }
}
