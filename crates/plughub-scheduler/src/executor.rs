//! Job handler contract and execution context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::job::JobKey;

/// Error from a job body.
///
/// Both variants are absorbed at the scheduler boundary and recorded in the
/// execution history as failed; neither ever reaches the timer loop.
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// The job body failed.
    #[error("job failed: {0}")]
    Failed(String),

    /// The job body observed a cancellation request and stopped early.
    #[error("job cancelled: {0}")]
    Cancelled(String),
}

/// Trait for job body implementations.
#[async_trait]
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// Execute the job with the given context.
    async fn execute(&self, ctx: &JobContext) -> Result<Option<Value>, JobExecutionError>;
}

/// Context passed to a job body for one execution.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The job being executed.
    pub job_key: JobKey,
    /// The trigger occurrence this execution honors.
    pub scheduled_time: DateTime<Utc>,
    /// When the scheduler actually dispatched the execution.
    pub fired_at: DateTime<Utc>,
    /// The job's opaque payload.
    pub job_data: HashMap<String, Value>,
    /// Cooperative cancellation flag, set by `JobScheduler::interrupt`.
    cancelled: Arc<AtomicBool>,
}

impl JobContext {
    /// Create an execution context.
    pub fn new(
        job_key: JobKey,
        scheduled_time: DateTime<Utc>,
        fired_at: DateTime<Utc>,
        job_data: HashMap<String, Value>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            job_key,
            scheduled_time,
            fired_at,
            job_data,
            cancelled,
        }
    }

    /// Whether interruption of this execution has been requested.
    ///
    /// Honoring the request is best-effort; a handler that does should
    /// return [`JobExecutionError::Cancelled`].
    pub fn is_cancellation_requested(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Get a string value from the job payload.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.job_data.get(key).and_then(|v| v.as_str())
    }

    /// Get an integer value from the job payload.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.job_data.get(key).and_then(|v| v.as_i64())
    }
}
