//! End-to-end lifecycle test against the wired host components.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use plughub_core::config::scheduler::SchedulerConfig;
use plughub_core::types::PageRequest;
use plughub_core::version::{Version, VersionOracle};
use plughub_plugin::{ExtensionPointType, ExtensionRegistry, PluginRegistry, PluginState};
use plughub_scheduler::{ExecutionHistoryLedger, ExecutionStatus, JobKey, JobScheduler};
use plugin_audit::{AuditLog, AuditPlugin, InMemoryAuditLog, PLUGIN_KEY};

struct Host {
    extensions: Arc<ExtensionRegistry>,
    scheduler: Arc<JobScheduler>,
    registry: PluginRegistry,
    audit_log: Arc<InMemoryAuditLog>,
}

fn wire_host() -> Host {
    let oracle = VersionOracle::new(Version::new(1, 0, 0), Version::new(1, 0, 0));
    let extensions = Arc::new(ExtensionRegistry::new(oracle));
    let history = Arc::new(ExecutionHistoryLedger::new());
    let scheduler = Arc::new(JobScheduler::new(SchedulerConfig::default(), history));
    let registry = PluginRegistry::new(oracle, Arc::clone(&extensions), Arc::clone(&scheduler));
    Host {
        extensions,
        scheduler,
        registry,
        audit_log: Arc::new(InMemoryAuditLog::new()),
    }
}

#[tokio::test]
async fn test_full_plugin_lifecycle() {
    let host = wire_host();
    let cleanup_key = JobKey::new("audit-cleanup", "plugin-audit");

    // Install: descriptor exists, nothing is registered yet.
    host.registry
        .install(Arc::new(AuditPlugin::new(
            Arc::clone(&host.audit_log) as Arc<dyn plugin_audit::AuditLog>
        )))
        .await
        .unwrap();
    assert_eq!(
        host.registry.state(PLUGIN_KEY).await,
        Some(PluginState::Installed)
    );
    assert_eq!(host.extensions.count().await, 0);

    // Enable: the widget and the cleanup job appear.
    host.registry.enable(PLUGIN_KEY).await.unwrap();
    assert_eq!(
        host.registry.state(PLUGIN_KEY).await,
        Some(PluginState::Active)
    );

    let widgets = host
        .extensions
        .lookup(ExtensionPointType::WebFragment, Some("dashboard.widgets"))
        .await;
    assert_eq!(widgets.len(), 1);
    assert_eq!(widgets[0].key, "audit-summary-widget");
    assert_eq!(widgets[0].owner_plugin_key, PLUGIN_KEY);
    assert_eq!(widgets[0].weight, 100);

    let jobs = host
        .extensions
        .lookup(ExtensionPointType::ScheduledJob, None)
        .await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].key, "audit-cleanup");
    assert!(host.scheduler.job_exists(&cleanup_key).await);

    // Disable: everything the plugin owns disappears, plugin settles at
    // Resolved, and disabling again is a no-op.
    host.registry.disable(PLUGIN_KEY).await.unwrap();
    assert_eq!(
        host.registry.state(PLUGIN_KEY).await,
        Some(PluginState::Resolved)
    );
    assert_eq!(host.extensions.count().await, 0);
    assert!(!host.scheduler.job_exists(&cleanup_key).await);
    host.registry.disable(PLUGIN_KEY).await.unwrap();

    // Uninstall from Resolved removes the descriptor.
    host.registry.uninstall(PLUGIN_KEY).await.unwrap();
    assert!(host.registry.descriptor(PLUGIN_KEY).await.is_none());
}

#[tokio::test]
async fn test_cleanup_job_purges_audit_entries() {
    let host = wire_host();
    let cleanup_key = JobKey::new("audit-cleanup", "plugin-audit");

    host.audit_log
        .record_at(Utc::now() - chrono::Duration::days(365), "stale entry")
        .await;
    host.audit_log.record("fresh entry").await;

    host.registry
        .install(Arc::new(AuditPlugin::new(
            Arc::clone(&host.audit_log) as Arc<dyn plugin_audit::AuditLog>
        )))
        .await
        .unwrap();
    host.registry.enable(PLUGIN_KEY).await.unwrap();

    // The cron trigger fires at 02:00; drive the job directly instead of
    // waiting a day.
    assert!(host.scheduler.fire_now(&cleanup_key, None).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(host.audit_log.entry_count().await, 1);

    let page = host
        .scheduler
        .history()
        .history(
            Some("audit-cleanup"),
            Some("plugin-audit"),
            None,
            None,
            &PageRequest::default(),
        )
        .await;
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].status, ExecutionStatus::Completed);

    let stats = host
        .scheduler
        .history()
        .statistics(Some("audit-cleanup"), Some("plugin-audit"), None, None)
        .await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);
}
