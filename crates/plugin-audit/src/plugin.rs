//! The audit plugin's activation contract.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use plughub_core::version::Version;
use plughub_plugin::{ExtensionPointType, Plugin, PluginContext, PluginDescriptor};
use plughub_scheduler::{JobDefinition, MisfireInstruction, TriggerDefinition};

use crate::cleanup::AuditCleanupHandler;
use crate::store::AuditLog;

/// The audit plugin's key.
pub const PLUGIN_KEY: &str = "com.plughub.audit";

/// Default audit retention window in days.
const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Daily at 02:00.
const CLEANUP_CRON: &str = "0 0 2 * * ?";

/// Audit logging plugin.
///
/// On activation it contributes a dashboard summary widget and the
/// `audit-cleanup` scheduled job. It deliberately unregisters nothing on
/// deactivation: the host's teardown owns that.
#[derive(Debug)]
pub struct AuditPlugin {
    /// The externally-provided audit log.
    audit_log: Arc<dyn AuditLog>,
    /// Retention window handed to the cleanup job.
    retention_days: u32,
}

impl AuditPlugin {
    /// Create the plugin over an audit log with the default retention.
    pub fn new(audit_log: Arc<dyn AuditLog>) -> Self {
        Self {
            audit_log,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    /// Override the retention window.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }
}

#[async_trait]
impl Plugin for AuditPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(
            PLUGIN_KEY,
            "Audit Plugin",
            Version::new(1, 0, 0),
            Version::new(1, 0, 0),
            "PlugHub Team",
        )
        .exporting(ExtensionPointType::WebFragment)
        .exporting(ExtensionPointType::ScheduledJob)
    }

    async fn activate(&self, ctx: &PluginContext) -> Result<(), String> {
        info!(retention_days = self.retention_days, "Activating audit plugin");

        ctx.register_extension(
            ctx.extension(
                ExtensionPointType::WebFragment,
                "audit-summary-widget",
                Version::new(1, 0, 0),
            )
            .at_location("dashboard.widgets")
            .with_weight(100)
            .requiring_permission("USER")
            .with_metadata("title", serde_json::json!("Audit Summary")),
        )
        .await
        .map_err(|e| e.to_string())?;

        let trigger = TriggerDefinition::cron("audit-cleanup-trigger", PLUGIN_KEY, CLEANUP_CRON)
            .with_misfire(MisfireInstruction::SmartPolicy);

        ctx.register_scheduled_job(
            ctx.extension(
                ExtensionPointType::ScheduledJob,
                "audit-cleanup",
                Version::new(1, 0, 0),
            )
            .with_metadata("cron", serde_json::json!(CLEANUP_CRON)),
            JobDefinition::new("audit-cleanup", "plugin-audit").with_data(
                "retention_days",
                serde_json::json!(self.retention_days),
            ),
            trigger,
            Arc::new(AuditCleanupHandler::new(
                Arc::clone(&self.audit_log),
                self.retention_days,
            )),
        )
        .await
        .map_err(|e| e.to_string())?;

        info!("Audit plugin activated");
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), String> {
        // The host has already removed the widget and the cleanup job.
        info!("Audit plugin deactivated");
        Ok(())
    }
}
