//! The audit-cleanup job body.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use plughub_scheduler::{JobContext, JobExecutionError, JobHandler};

use crate::store::AuditLog;

/// Deletes audit entries older than the retention window.
///
/// Failures propagate as [`JobExecutionError::Failed`] and are recorded by
/// the scheduler; the job never retries on its own.
#[derive(Debug)]
pub struct AuditCleanupHandler {
    /// The audit log being cleaned.
    audit_log: Arc<dyn AuditLog>,
    /// Retention window in days.
    retention_days: u32,
}

impl AuditCleanupHandler {
    /// Create a cleanup handler with the given retention window.
    pub fn new(audit_log: Arc<dyn AuditLog>, retention_days: u32) -> Self {
        Self {
            audit_log,
            retention_days,
        }
    }
}

#[async_trait]
impl JobHandler for AuditCleanupHandler {
    async fn execute(&self, ctx: &JobContext) -> Result<Option<Value>, JobExecutionError> {
        info!(job = %ctx.job_key, retention_days = self.retention_days, "Running audit cleanup");

        let removed = self
            .audit_log
            .delete_older_than(self.retention_days)
            .await
            .map_err(|e| JobExecutionError::Failed(format!("audit cleanup failed: {e}")))?;

        info!(removed, "Audit cleanup finished");
        Ok(Some(serde_json::json!({
            "task": "audit_cleanup",
            "entries_removed": removed,
            "retention_days": self.retention_days,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;

    use chrono::{Duration, Utc};

    use plughub_scheduler::JobKey;

    use crate::store::InMemoryAuditLog;

    fn ctx() -> JobContext {
        JobContext::new(
            JobKey::new("audit-cleanup", "plugin-audit"),
            Utc::now(),
            Utc::now(),
            HashMap::new(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn test_cleanup_reports_removed_count() {
        let log = Arc::new(InMemoryAuditLog::new());
        log.record_at(Utc::now() - Duration::days(200), "stale").await;
        log.record("fresh").await;

        let handler = AuditCleanupHandler::new(Arc::clone(&log) as Arc<dyn AuditLog>, 90);
        let output = handler.execute(&ctx()).await.unwrap().unwrap();

        assert_eq!(output["entries_removed"], 1);
        assert_eq!(log.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_failure_surfaces_as_failed() {
        /// Audit log whose storage is unavailable.
        #[derive(Debug)]
        struct BrokenAuditLog;

        #[async_trait]
        impl AuditLog for BrokenAuditLog {
            async fn delete_older_than(&self, _days: u32) -> Result<u64, String> {
                Err("storage unavailable".to_string())
            }

            async fn entry_count(&self) -> u64 {
                0
            }
        }

        let handler = AuditCleanupHandler::new(Arc::new(BrokenAuditLog), 90);
        let err = handler.execute(&ctx()).await.unwrap_err();
        assert!(matches!(err, JobExecutionError::Failed(_)));
    }
}
