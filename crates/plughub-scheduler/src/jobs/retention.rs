//! Execution-history retention job handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::executor::{JobContext, JobExecutionError, JobHandler};
use crate::history::ExecutionHistoryLedger;

/// Purges old execution-history records.
///
/// The host schedules this against its own ledger; running entries are never
/// touched regardless of age.
#[derive(Debug)]
pub struct HistoryRetentionHandler {
    /// The ledger being pruned.
    history: Arc<ExecutionHistoryLedger>,
    /// Retention window in days.
    retention_days: u32,
}

impl HistoryRetentionHandler {
    /// Create a retention handler.
    pub fn new(history: Arc<ExecutionHistoryLedger>, retention_days: u32) -> Self {
        Self {
            history,
            retention_days,
        }
    }
}

#[async_trait]
impl JobHandler for HistoryRetentionHandler {
    async fn execute(&self, _ctx: &JobContext) -> Result<Option<Value>, JobExecutionError> {
        let purged = self.history.delete_older_than(self.retention_days).await;
        info!(purged, retention_days = self.retention_days, "Execution history pruned");
        Ok(Some(serde_json::json!({
            "task": "history_retention",
            "records_purged": purged,
            "retention_days": self.retention_days,
        })))
    }
}
