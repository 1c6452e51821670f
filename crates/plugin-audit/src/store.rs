//! Audit log sink contract and an in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::info;

/// The audit log the plugin cleans up.
///
/// Provided by the host; real deployments back this with their audit-entry
/// storage, the in-memory implementation exists for demos and tests.
#[async_trait]
pub trait AuditLog: Send + Sync + std::fmt::Debug {
    /// Delete entries older than the given number of days. Returns how many
    /// were removed.
    async fn delete_older_than(&self, days: u32) -> Result<u64, String>;

    /// Number of entries currently stored.
    async fn entry_count(&self) -> u64;
}

/// One stored audit entry.
#[derive(Debug, Clone)]
struct AuditEntry {
    recorded_at: DateTime<Utc>,
    message: String,
}

/// In-memory audit log.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry stamped now.
    pub async fn record(&self, message: impl Into<String>) {
        self.record_at(Utc::now(), message).await;
    }

    /// Append an entry with an explicit timestamp.
    pub async fn record_at(&self, recorded_at: DateTime<Utc>, message: impl Into<String>) {
        self.entries.write().await.push(AuditEntry {
            recorded_at,
            message: message.into(),
        });
    }

    /// The most recent `limit` messages, newest first.
    pub async fn recent_messages(&self, limit: usize) -> Vec<String> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .take(limit)
            .map(|e| e.message.clone())
            .collect()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn delete_older_than(&self, days: u32) -> Result<u64, String> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.recorded_at >= cutoff);
        let removed = (before - entries.len()) as u64;
        if removed > 0 {
            info!(removed, days, "Purged old audit entries");
        }
        Ok(removed)
    }

    async fn entry_count(&self) -> u64 {
        self.entries.read().await.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_older_than_respects_cutoff() {
        let log = InMemoryAuditLog::new();
        log.record_at(Utc::now() - Duration::days(120), "ancient login")
            .await;
        log.record_at(Utc::now() - Duration::days(10), "recent login")
            .await;
        log.record("fresh login").await;

        let removed = log.delete_older_than(90).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(log.entry_count().await, 2);
        assert_eq!(
            log.recent_messages(10).await,
            vec!["fresh login", "recent login"]
        );

        // Nothing left beyond the cutoff; a second pass removes nothing.
        assert_eq!(log.delete_older_than(90).await.unwrap(), 0);
    }
}
