//! Job identity and definition types.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Composite job identity, unique among live jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    /// Job name, unique within its group.
    pub name: String,
    /// Job group.
    pub group: String,
}

impl JobKey {
    /// Create a job key.
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Definition of a schedulable job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Job name, unique within its group while scheduled.
    pub job_name: String,
    /// Job group.
    pub job_group: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// Whether the definition survives with no attached trigger.
    #[serde(default)]
    pub durable: bool,
    /// Whether the job should be re-fired if the process terminated while it
    /// was running. Kept as data; the re-fire itself is driven by whoever
    /// owns the persisted execution state.
    #[serde(default)]
    pub requests_recovery: bool,
    /// Opaque payload passed to every execution.
    #[serde(default)]
    pub job_data: HashMap<String, Value>,
}

impl JobDefinition {
    /// Create a minimal definition with an empty payload.
    pub fn new(job_name: impl Into<String>, job_group: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            job_group: job_group.into(),
            description: None,
            durable: false,
            requests_recovery: false,
            job_data: HashMap::new(),
        }
    }

    /// The composite key of this job.
    pub fn key(&self) -> JobKey {
        JobKey::new(self.job_name.clone(), self.job_group.clone())
    }

    /// Mark the job durable.
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Set the job payload.
    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.job_data.insert(key.to_string(), value);
        self
    }
}

/// Dispatch state of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for its next fire time.
    Scheduled,
    /// An execution is currently in flight.
    Firing,
    /// Not eligible for dispatch until resumed.
    Paused,
}

impl JobState {
    /// The state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Firing => "firing",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time snapshot of a scheduled job, for the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    /// The job definition.
    pub definition: JobDefinition,
    /// Current dispatch state.
    pub state: JobState,
    /// Next computed fire time, if a live trigger is attached.
    pub next_fire_time: Option<DateTime<Utc>>,
    /// Number of times the job has been dispatched.
    pub times_triggered: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = JobKey::new("audit-cleanup", "plugin-audit");
        assert_eq!(key.to_string(), "plugin-audit.audit-cleanup");
    }

    #[test]
    fn test_definition_key() {
        let def = JobDefinition::new("report", "weekly").durable(true);
        assert_eq!(def.key(), JobKey::new("report", "weekly"));
        assert!(def.durable);
        assert!(!def.requests_recovery);
    }
}
