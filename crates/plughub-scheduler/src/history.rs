//! Append-only execution-history ledger.
//!
//! Every dispatched execution gets a record at dispatch time and is
//! finalized exactly once at completion. Records are only ever removed by
//! the explicit retention cleanup, which never touches running entries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use plughub_core::error::PlatformError;
use plughub_core::result::PlatformResult;
use plughub_core::types::{PageRequest, PageResponse};

/// Status of one recorded execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Dispatched, not yet finished.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error (including honored cancellations).
    Failed,
    /// Dropped because a prior execution of the same job was still running.
    Vetoed,
}

impl ExecutionStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// The status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Vetoed => "vetoed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One execution of a job, from dispatch to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    /// Monotonic record id.
    pub id: u64,
    /// Job name.
    pub job_name: String,
    /// Job group.
    pub job_group: String,
    /// Dispatch time.
    pub started_at: DateTime<Utc>,
    /// Completion time; `None` while running.
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: Option<u64>,
    /// Current status.
    pub status: ExecutionStatus,
    /// Error message for failed executions.
    pub error_message: Option<String>,
}

/// Aggregated execution statistics over a time range.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobExecutionStats {
    /// Total executions in range.
    pub total: u64,
    /// Completed count.
    pub completed: u64,
    /// Failed count.
    pub failed: u64,
    /// Vetoed count.
    pub vetoed: u64,
    /// Average duration over completed executions.
    pub avg_execution_time_ms: Option<f64>,
    /// Minimum duration over completed executions.
    pub min_execution_time_ms: Option<u64>,
    /// Maximum duration over completed executions.
    pub max_execution_time_ms: Option<u64>,
}

/// In-memory append-only ledger of job executions.
#[derive(Debug)]
pub struct ExecutionHistoryLedger {
    /// Next record id; allocation is atomic so concurrent dispatches never
    /// collide.
    next_id: AtomicU64,
    /// Records by id (insertion order == id order).
    records: RwLock<BTreeMap<u64, JobExecutionRecord>>,
}

impl ExecutionHistoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record the start of an execution and return its history id.
    pub async fn record_start(
        &self,
        job_name: &str,
        job_group: &str,
        started_at: DateTime<Utc>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = JobExecutionRecord {
            id,
            job_name: job_name.to_string(),
            job_group: job_group.to_string(),
            started_at,
            completed_at: None,
            execution_time_ms: None,
            status: ExecutionStatus::Running,
            error_message: None,
        };

        self.records.write().await.insert(id, record);
        debug!(history_id = id, job = %format!("{job_group}.{job_name}"), "Recorded execution start");
        id
    }

    /// Finalize a running record with its terminal status.
    ///
    /// Fails with [`PlatformError::UnknownHistoryId`] when the id does not
    /// exist or the record is already terminal; completion is not idempotent.
    pub async fn record_completion(
        &self,
        id: u64,
        completed_at: DateTime<Utc>,
        execution_time_ms: u64,
        status: ExecutionStatus,
        error_message: Option<String>,
    ) -> PlatformResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .filter(|r| !r.status.is_terminal())
            .ok_or(PlatformError::UnknownHistoryId(id))?;

        record.completed_at = Some(completed_at);
        record.execution_time_ms = Some(execution_time_ms);
        record.status = status;
        record.error_message = error_message;

        debug!(
            history_id = id,
            status = %status,
            duration_ms = execution_time_ms,
            "Recorded execution completion"
        );
        Ok(())
    }

    /// Fetch a single record.
    pub async fn get(&self, id: u64) -> Option<JobExecutionRecord> {
        self.records.read().await.get(&id).cloned()
    }

    /// Paged history query, newest first, optionally filtered by job name,
    /// group, and started-at range.
    pub async fn history(
        &self,
        job_name: Option<&str>,
        job_group: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        page: &PageRequest,
    ) -> PageResponse<JobExecutionRecord> {
        let records = self.records.read().await;
        let matching: Vec<JobExecutionRecord> = records
            .values()
            .rev()
            .filter(|r| matches_filter(r, job_name, job_group, from, to))
            .cloned()
            .collect();
        PageResponse::from_items(matching, page)
    }

    /// The most recent `limit` records across all jobs.
    pub async fn recent(&self, limit: usize) -> Vec<JobExecutionRecord> {
        let records = self.records.read().await;
        records.values().rev().take(limit).cloned().collect()
    }

    /// Aggregate statistics over a started-at range. Duration aggregates
    /// cover completed executions only.
    pub async fn statistics(
        &self,
        job_name: Option<&str>,
        job_group: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> JobExecutionStats {
        let records = self.records.read().await;
        let mut stats = JobExecutionStats::default();
        let mut completed_total_ms = 0u64;

        for record in records.values() {
            if !matches_filter(record, job_name, job_group, from, to) {
                continue;
            }
            stats.total += 1;
            match record.status {
                ExecutionStatus::Completed => {
                    stats.completed += 1;
                    if let Some(ms) = record.execution_time_ms {
                        completed_total_ms += ms;
                        stats.min_execution_time_ms =
                            Some(stats.min_execution_time_ms.map_or(ms, |m| m.min(ms)));
                        stats.max_execution_time_ms =
                            Some(stats.max_execution_time_ms.map_or(ms, |m| m.max(ms)));
                    }
                }
                ExecutionStatus::Failed => stats.failed += 1,
                ExecutionStatus::Vetoed => stats.vetoed += 1,
                ExecutionStatus::Running => {}
            }
        }

        if stats.completed > 0 {
            stats.avg_execution_time_ms = Some(completed_total_ms as f64 / stats.completed as f64);
        }
        stats
    }

    /// Purge terminal records whose completion is older than `days` days.
    /// Running records are never purged regardless of age.
    pub async fn delete_older_than(&self, days: u32) -> usize {
        self.delete_completed_before(Utc::now() - Duration::days(i64::from(days)))
            .await
    }

    /// Purge terminal records completed before `cutoff`.
    pub async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| match (r.status.is_terminal(), r.completed_at) {
            (true, Some(completed)) => completed >= cutoff,
            _ => true,
        });
        let purged = before - records.len();
        if purged > 0 {
            debug!(purged, "Purged old execution history records");
        }
        purged
    }

    /// Number of records currently held.
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for ExecutionHistoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(
    record: &JobExecutionRecord,
    job_name: Option<&str>,
    job_group: Option<&str>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> bool {
    if let Some(name) = job_name {
        if record.job_name != name {
            return false;
        }
    }
    if let Some(group) = job_group {
        if record.job_group != group {
            return false;
        }
    }
    if let Some(from) = from {
        if record.started_at < from {
            return false;
        }
    }
    if let Some(to) = to {
        if record.started_at > to {
            return false;
        }
    }
    true
}
