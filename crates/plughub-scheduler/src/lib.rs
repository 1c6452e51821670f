//! Trigger-driven job scheduling for PlugHub.
//!
//! This crate provides:
//! - A job/trigger model with cron and fixed-interval schedules
//! - Pure fire-time planning with the four misfire policies
//! - A single-loop scheduler dispatching onto a bounded worker pool,
//!   with per-job overlap vetoes
//! - An append-only execution-history ledger with statistics and retention

pub mod executor;
pub mod history;
pub mod job;
pub mod jobs;
pub mod scheduler;
pub mod trigger;

pub use executor::{JobContext, JobExecutionError, JobHandler};
pub use history::{ExecutionHistoryLedger, ExecutionStatus, JobExecutionRecord};
pub use job::{JobDefinition, JobDetail, JobKey, JobState};
pub use scheduler::JobScheduler;
pub use trigger::{MisfireInstruction, TriggerDefinition, TriggerSchedule};
