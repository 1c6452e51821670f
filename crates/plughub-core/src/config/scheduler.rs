//! Job scheduler configuration.

use serde::{Deserialize, Serialize};

/// Job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the scheduler is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of concurrent job executions across the worker pool.
    #[serde(default = "default_concurrency")]
    pub worker_concurrency: usize,
    /// Interval in milliseconds between trigger evaluation ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// A trigger whose fire time has passed by more than this threshold is
    /// treated as misfired and handled per its misfire instruction.
    #[serde(default = "default_misfire_threshold")]
    pub misfire_threshold_ms: u64,
    /// Days of execution history retained by the cleanup pass.
    #[serde(default = "default_retention_days")]
    pub history_retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_concurrency: default_concurrency(),
            tick_interval_ms: default_tick_interval(),
            misfire_threshold_ms: default_misfire_threshold(),
            history_retention_days: default_retention_days(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_tick_interval() -> u64 {
    500
}

fn default_misfire_threshold() -> u64 {
    60_000
}

fn default_retention_days() -> u32 {
    90
}
