//! PlugHub Host — plugin platform host process.
//!
//! Main entry point that wires the version oracle, extension registry, job
//! scheduler, and plugin registry together, loads the bundled plugins, and
//! runs until shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tracing;
use tracing_subscriber::{fmt, EnvFilter};

use plughub_core::config::PlatformConfig;
use plughub_core::error::PlatformError;
use plughub_plugin::{ExtensionRegistry, PluginRegistry};
use plughub_scheduler::jobs::HistoryRetentionHandler;
use plughub_scheduler::{
    ExecutionHistoryLedger, JobDefinition, JobScheduler, TriggerDefinition,
};
use plugin_audit::{AuditLog, AuditPlugin, InMemoryAuditLog, PLUGIN_KEY};

#[tokio::main]
async fn main() {
    let config = match PlatformConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Host error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &PlatformConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
        _ => {
            fmt().pretty().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Main host run function
async fn run(config: PlatformConfig) -> Result<(), PlatformError> {
    tracing::info!("Starting PlugHub host v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Version oracle ───────────────────────────────────
    let oracle = config.api.oracle()?;
    tracing::info!(
        api_version = %oracle.current(),
        minimum_supported = %oracle.minimum_supported(),
        "Platform API window"
    );

    // ── Step 2: Core registries and scheduler ────────────────────
    let extensions = Arc::new(ExtensionRegistry::new(oracle));
    let history = Arc::new(ExecutionHistoryLedger::new());
    let scheduler = Arc::new(JobScheduler::new(
        config.scheduler.clone(),
        Arc::clone(&history),
    ));
    let registry = Arc::new(PluginRegistry::new(
        oracle,
        Arc::clone(&extensions),
        Arc::clone(&scheduler),
    ));

    // ── Step 3: Shutdown channel ─────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Step 4: Start the scheduler loop ─────────────────────────
    let scheduler_handle = if config.scheduler.enabled {
        let loop_scheduler = Arc::clone(&scheduler);
        let cancel = shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            loop_scheduler.run(cancel).await;
        });

        // Host-owned maintenance: prune execution history nightly at 03:00.
        scheduler
            .schedule(
                JobDefinition::new("history-retention", "platform").durable(true),
                Some(TriggerDefinition::cron(
                    "history-retention-trigger",
                    "platform",
                    "0 0 3 * * ?",
                )),
                Arc::new(HistoryRetentionHandler::new(
                    Arc::clone(&history),
                    config.scheduler.history_retention_days,
                )),
            )
            .await?;

        tracing::info!("Job scheduler started");
        Some(handle)
    } else {
        tracing::info!("Job scheduler disabled");
        None
    };

    // ── Step 5: Install bundled plugins ──────────────────────────
    tracing::info!("Installing bundled plugins...");
    let audit_log: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());
    registry
        .install(Arc::new(AuditPlugin::new(Arc::clone(&audit_log))))
        .await?;

    if config.plugins.auto_enable {
        registry.enable(PLUGIN_KEY).await?;
    }

    tracing::info!(
        plugins = registry.count().await,
        extensions = extensions.count().await,
        "Host ready"
    );

    // ── Step 6: Wait for shutdown signal ─────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");

    // ── Step 7: Disable plugins, stop the scheduler ──────────────
    registry.disable_all().await;
    let _ = shutdown_tx.send(true);

    if let Some(handle) = scheduler_handle {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(35), handle).await;
    }

    tracing::info!("PlugHub host shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => {
                tracing::error!("Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
