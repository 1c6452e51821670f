//! Plugin registry — the install/resolve/start/stop/uninstall state machine.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use plughub_core::error::PlatformError;
use plughub_core::result::PlatformResult;
use plughub_core::version::VersionOracle;
use plughub_scheduler::JobScheduler;

use crate::context::PluginContext;
use crate::descriptor::{PluginDescriptor, PluginState};
use crate::extension::ExtensionRegistry;
use crate::traits::Plugin;

/// An installed plugin and its descriptor.
struct PluginEntry {
    /// The plugin instance.
    plugin: Arc<dyn Plugin>,
    /// Descriptor; `state` is mutated only by this registry.
    descriptor: PluginDescriptor,
}

/// Registry enforcing the plugin lifecycle state machine.
///
/// Transitions on the same plugin key serialize through a per-key mutex;
/// transitions on different keys proceed independently. No registry lock is
/// ever held across a call into plugin-supplied code.
pub struct PluginRegistry {
    /// Version oracle consulted at resolve time.
    oracle: VersionOracle,
    /// Extension registry torn down on deactivation and rollback.
    extensions: Arc<ExtensionRegistry>,
    /// Job scheduler torn down on deactivation and rollback.
    scheduler: Arc<JobScheduler>,
    /// Installed plugins by key.
    plugins: RwLock<HashMap<String, PluginEntry>>,
    /// Per-key transition locks.
    transitions: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry").finish()
    }
}

impl PluginRegistry {
    /// Create a registry over the given extension registry and scheduler.
    pub fn new(
        oracle: VersionOracle,
        extensions: Arc<ExtensionRegistry>,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        Self {
            oracle,
            extensions,
            scheduler,
            plugins: RwLock::new(HashMap::new()),
            transitions: DashMap::new(),
        }
    }

    /// Install a plugin, creating its descriptor in the Installed state.
    pub async fn install(&self, plugin: Arc<dyn Plugin>) -> PlatformResult<PluginDescriptor> {
        let mut descriptor = plugin.descriptor();
        descriptor.state = PluginState::Installed;
        let key = descriptor.key.clone();

        let mut plugins = self.plugins.write().await;
        if plugins.contains_key(&key) {
            return Err(PlatformError::DuplicatePluginKey(key));
        }

        info!(
            plugin = %key,
            name = %descriptor.name,
            version = %descriptor.version,
            "Plugin installed"
        );
        plugins.insert(
            key,
            PluginEntry {
                plugin,
                descriptor: descriptor.clone(),
            },
        );
        Ok(descriptor)
    }

    /// Enable a plugin: resolve it if needed, then drive it to Active
    /// through its activation hook.
    ///
    /// If activation fails, anything the plugin managed to register is
    /// removed and the plugin settles at Resolved.
    pub async fn enable(&self, key: &str) -> PlatformResult<()> {
        let lock = self.transition_lock(key);
        let _guard = lock.lock().await;

        let (plugin, state, min_platform) = {
            let plugins = self.plugins.read().await;
            let entry = plugins
                .get(key)
                .ok_or_else(|| PlatformError::PluginNotFound(key.to_string()))?;
            (
                Arc::clone(&entry.plugin),
                entry.descriptor.state,
                entry.descriptor.min_platform_version,
            )
        };

        match state {
            PluginState::Installed => {
                if !self.oracle.supports_minimum(min_platform) {
                    return Err(PlatformError::IncompatiblePluginVersion {
                        key: key.to_string(),
                        required: min_platform.to_string(),
                        supported_floor: self.oracle.minimum_supported().to_string(),
                        current: self.oracle.current().to_string(),
                    });
                }
                self.set_state(key, PluginState::Resolved).await;
                info!(plugin = %key, "Plugin resolved");
            }
            PluginState::Resolved => {}
            other => {
                return Err(PlatformError::InvalidLifecycleTransition {
                    key: key.to_string(),
                    from: other.to_string(),
                    requested: "start".to_string(),
                });
            }
        }

        self.set_state(key, PluginState::Starting).await;

        let ctx = PluginContext::new(key, Arc::clone(&self.extensions), Arc::clone(&self.scheduler));

        // Plugin code runs with no registry lock held.
        match plugin.activate(&ctx).await {
            Ok(()) => {
                self.set_state(key, PluginState::Active).await;
                info!(plugin = %key, "Plugin enabled");
                Ok(())
            }
            Err(reason) => {
                // Roll back whatever the plugin managed to register.
                let removed_extensions = self.extensions.deregister_all(key).await;
                let removed_jobs = self.scheduler.unschedule_owned(key).await;
                self.set_state(key, PluginState::Resolved).await;
                warn!(
                    plugin = %key,
                    reason = %reason,
                    removed_extensions,
                    removed_jobs,
                    "Plugin activation failed; rolled back to resolved"
                );
                Err(PlatformError::PluginActivationFailed {
                    key: key.to_string(),
                    reason,
                })
            }
        }
    }

    /// Disable an Active plugin, removing everything it registered before
    /// its deactivation hook runs. A no-op returning success when the plugin
    /// is not Active.
    pub async fn disable(&self, key: &str) -> PlatformResult<()> {
        let lock = self.transition_lock(key);
        let _guard = lock.lock().await;

        let (plugin, state) = {
            let plugins = self.plugins.read().await;
            let entry = plugins
                .get(key)
                .ok_or_else(|| PlatformError::PluginNotFound(key.to_string()))?;
            (Arc::clone(&entry.plugin), entry.descriptor.state)
        };

        if state != PluginState::Active {
            return Ok(());
        }

        self.set_state(key, PluginState::Stopping).await;

        // Teardown happens before the plugin hears about it, so a misbehaving
        // deactivation hook cannot leave registrations behind.
        let removed_extensions = self.extensions.deregister_all(key).await;
        let removed_jobs = self.scheduler.unschedule_owned(key).await;

        if let Err(reason) = plugin.deactivate().await {
            warn!(plugin = %key, reason = %reason, "Plugin deactivation hook returned error");
        }

        self.set_state(key, PluginState::Resolved).await;
        info!(
            plugin = %key,
            removed_extensions,
            removed_jobs,
            "Plugin disabled"
        );
        Ok(())
    }

    /// Uninstall a plugin. Legal only from Installed or Resolved.
    pub async fn uninstall(&self, key: &str) -> PlatformResult<()> {
        let lock = self.transition_lock(key);
        let _guard = lock.lock().await;

        {
            let plugins = self.plugins.read().await;
            let entry = plugins
                .get(key)
                .ok_or_else(|| PlatformError::PluginNotFound(key.to_string()))?;
            match entry.descriptor.state {
                PluginState::Installed | PluginState::Resolved => {}
                _ => return Err(PlatformError::PluginStillActive(key.to_string())),
            }
        }

        self.plugins.write().await.remove(key);
        drop(_guard);
        self.transitions.remove(key);
        info!(plugin = %key, "Plugin uninstalled");
        Ok(())
    }

    /// Disable every Active plugin, then leave the registry usable.
    pub async fn disable_all(&self) {
        let keys: Vec<String> = {
            let plugins = self.plugins.read().await;
            plugins.keys().cloned().collect()
        };
        for key in keys {
            if let Err(e) = self.disable(&key).await {
                warn!(plugin = %key, error = %e, "Error disabling plugin");
            }
        }
    }

    /// The descriptor of an installed plugin.
    pub async fn descriptor(&self, key: &str) -> Option<PluginDescriptor> {
        let plugins = self.plugins.read().await;
        plugins.get(key).map(|e| e.descriptor.clone())
    }

    /// The lifecycle state of an installed plugin.
    pub async fn state(&self, key: &str) -> Option<PluginState> {
        let plugins = self.plugins.read().await;
        plugins.get(key).map(|e| e.descriptor.state)
    }

    /// Whether a plugin is currently enabled.
    pub async fn is_enabled(&self, key: &str) -> bool {
        self.state(key).await.is_some_and(|s| s.is_enabled())
    }

    /// Descriptors of all installed plugins, ordered by key.
    pub async fn list(&self) -> Vec<PluginDescriptor> {
        let plugins = self.plugins.read().await;
        let mut descriptors: Vec<PluginDescriptor> =
            plugins.values().map(|e| e.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.key.cmp(&b.key));
        descriptors
    }

    /// Number of installed plugins.
    pub async fn count(&self) -> usize {
        self.plugins.read().await.len()
    }

    fn transition_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.transitions
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn set_state(&self, key: &str, state: PluginState) {
        let mut plugins = self.plugins.write().await;
        if let Some(entry) = plugins.get_mut(key) {
            entry.descriptor.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use plughub_core::config::scheduler::SchedulerConfig;
    use plughub_core::version::Version;
    use plughub_scheduler::{
        ExecutionHistoryLedger, JobContext, JobDefinition, JobExecutionError, JobHandler, JobKey,
        TriggerDefinition,
    };
    use serde_json::Value;

    use crate::extension::ExtensionPointType;

    #[derive(Debug)]
    struct NoopJob;

    #[async_trait]
    impl JobHandler for NoopJob {
        async fn execute(&self, _ctx: &JobContext) -> Result<Option<Value>, JobExecutionError> {
            Ok(None)
        }
    }

    /// Plugin that registers a widget and a scheduled job on activation.
    #[derive(Debug)]
    struct TestPlugin {
        key: String,
        min_platform: Version,
        fail_activation: bool,
    }

    impl TestPlugin {
        fn new(key: &str) -> Arc<Self> {
            Arc::new(Self {
                key: key.to_string(),
                min_platform: Version::new(1, 0, 0),
                fail_activation: false,
            })
        }

        fn requiring(key: &str, min_platform: Version) -> Arc<Self> {
            Arc::new(Self {
                key: key.to_string(),
                min_platform,
                fail_activation: false,
            })
        }

        fn failing(key: &str) -> Arc<Self> {
            Arc::new(Self {
                key: key.to_string(),
                min_platform: Version::new(1, 0, 0),
                fail_activation: true,
            })
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn descriptor(&self) -> PluginDescriptor {
            PluginDescriptor::new(
                &self.key,
                "Test Plugin",
                Version::new(0, 1, 0),
                self.min_platform,
                "Test Vendor",
            )
            .exporting(ExtensionPointType::WebFragment)
            .exporting(ExtensionPointType::ScheduledJob)
        }

        async fn activate(&self, ctx: &PluginContext) -> Result<(), String> {
            ctx.register_extension(
                ctx.extension(
                    ExtensionPointType::WebFragment,
                    "widget",
                    Version::new(1, 0, 0),
                )
                .at_location("dashboard.widgets"),
            )
            .await
            .map_err(|e| e.to_string())?;

            if self.fail_activation {
                // Fail after one registration to exercise partial rollback.
                return Err("activation exploded".to_string());
            }

            ctx.register_scheduled_job(
                ctx.extension(
                    ExtensionPointType::ScheduledJob,
                    "tick",
                    Version::new(1, 0, 0),
                ),
                JobDefinition::new("tick", &self.key),
                TriggerDefinition::simple("tick-trigger", &self.key, -1, 60_000),
                Arc::new(NoopJob),
            )
            .await
            .map_err(|e| e.to_string())?;
            Ok(())
        }

        async fn deactivate(&self) -> Result<(), String> {
            Ok(())
        }
    }

    struct Harness {
        registry: PluginRegistry,
        extensions: Arc<ExtensionRegistry>,
        scheduler: Arc<JobScheduler>,
    }

    fn harness() -> Harness {
        let oracle = VersionOracle::new(Version::new(1, 4, 0), Version::new(1, 0, 0));
        let extensions = Arc::new(ExtensionRegistry::new(oracle));
        let scheduler = Arc::new(JobScheduler::new(
            SchedulerConfig::default(),
            Arc::new(ExecutionHistoryLedger::new()),
        ));
        Harness {
            registry: PluginRegistry::new(
                oracle,
                Arc::clone(&extensions),
                Arc::clone(&scheduler),
            ),
            extensions,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_install_duplicate_key_rejected() {
        let h = harness();
        h.registry.install(TestPlugin::new("p1")).await.unwrap();
        let err = h.registry.install(TestPlugin::new("p1")).await.unwrap_err();
        assert!(matches!(err, PlatformError::DuplicatePluginKey(_)));
    }

    #[tokio::test]
    async fn test_enable_drives_to_active_and_registers() {
        let h = harness();
        h.registry.install(TestPlugin::new("p1")).await.unwrap();
        assert_eq!(h.registry.state("p1").await, Some(PluginState::Installed));

        h.registry.enable("p1").await.unwrap();

        assert_eq!(h.registry.state("p1").await, Some(PluginState::Active));
        assert!(h.registry.is_enabled("p1").await);
        assert_eq!(h.extensions.count_for_owner("p1").await, 2);
        assert!(h.scheduler.job_exists(&JobKey::new("tick", "p1")).await);
    }

    #[tokio::test]
    async fn test_enable_unknown_plugin() {
        let h = harness();
        assert!(matches!(
            h.registry.enable("ghost").await.unwrap_err(),
            PlatformError::PluginNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_incompatible_version_fails_resolve_without_mutation() {
        let h = harness();
        // Requires platform 2.x; the host runs 1.4.
        h.registry
            .install(TestPlugin::requiring("p1", Version::new(2, 0, 0)))
            .await
            .unwrap();

        let err = h.registry.enable("p1").await.unwrap_err();
        assert!(matches!(
            err,
            PlatformError::IncompatiblePluginVersion { .. }
        ));
        // The descriptor is left exactly as it was.
        assert_eq!(h.registry.state("p1").await, Some(PluginState::Installed));
        assert_eq!(h.extensions.count_for_owner("p1").await, 0);
    }

    #[tokio::test]
    async fn test_enable_while_active_is_invalid_transition() {
        let h = harness();
        h.registry.install(TestPlugin::new("p1")).await.unwrap();
        h.registry.enable("p1").await.unwrap();

        let err = h.registry.enable("p1").await.unwrap_err();
        assert!(matches!(
            err,
            PlatformError::InvalidLifecycleTransition { .. }
        ));
        assert_eq!(h.registry.state("p1").await, Some(PluginState::Active));
    }

    #[tokio::test]
    async fn test_activation_failure_rolls_back_partial_state() {
        let h = harness();
        h.registry.install(TestPlugin::failing("p1")).await.unwrap();

        let err = h.registry.enable("p1").await.unwrap_err();
        assert!(matches!(err, PlatformError::PluginActivationFailed { .. }));

        // The widget registered before the failure is gone and the plugin
        // settled at Resolved.
        assert_eq!(h.registry.state("p1").await, Some(PluginState::Resolved));
        assert_eq!(h.extensions.count_for_owner("p1").await, 0);
        assert!(!h.scheduler.job_exists(&JobKey::new("tick", "p1")).await);
    }

    #[tokio::test]
    async fn test_disable_tears_down_then_settles_resolved() {
        let h = harness();
        h.registry.install(TestPlugin::new("p1")).await.unwrap();
        h.registry.enable("p1").await.unwrap();

        h.registry.disable("p1").await.unwrap();

        assert_eq!(h.registry.state("p1").await, Some(PluginState::Resolved));
        assert_eq!(h.extensions.count_for_owner("p1").await, 0);
        assert!(!h.scheduler.job_exists(&JobKey::new("tick", "p1")).await);

        // Idempotent from any non-Active state.
        h.registry.disable("p1").await.unwrap();
        assert_eq!(h.registry.state("p1").await, Some(PluginState::Resolved));
    }

    #[tokio::test]
    async fn test_uninstall_guards() {
        let h = harness();
        h.registry.install(TestPlugin::new("p1")).await.unwrap();
        h.registry.enable("p1").await.unwrap();

        assert!(matches!(
            h.registry.uninstall("p1").await.unwrap_err(),
            PlatformError::PluginStillActive(_)
        ));

        h.registry.disable("p1").await.unwrap();
        h.registry.uninstall("p1").await.unwrap();
        assert!(h.registry.descriptor("p1").await.is_none());
        assert_eq!(h.registry.count().await, 0);

        assert!(matches!(
            h.registry.uninstall("p1").await.unwrap_err(),
            PlatformError::PluginNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_registrations_track_activity_across_lifecycle() {
        // Registry contents must be a pure function of plugin activity: a
        // non-Active plugin owns zero registrations at every step.
        let h = harness();
        h.registry.install(TestPlugin::new("p1")).await.unwrap();
        assert_eq!(h.extensions.count_for_owner("p1").await, 0);

        for _ in 0..3 {
            h.registry.enable("p1").await.unwrap();
            assert_eq!(h.extensions.count_for_owner("p1").await, 2);

            h.registry.disable("p1").await.unwrap();
            assert_eq!(h.extensions.count_for_owner("p1").await, 0);
            assert!(!h.scheduler.job_exists(&JobKey::new("tick", "p1")).await);
        }

        h.registry.uninstall("p1").await.unwrap();
        assert_eq!(h.extensions.count().await, 0);
    }

    #[tokio::test]
    async fn test_independent_plugins_coexist() {
        let h = harness();
        h.registry.install(TestPlugin::new("p1")).await.unwrap();
        h.registry.install(TestPlugin::new("p2")).await.unwrap();
        h.registry.enable("p1").await.unwrap();
        h.registry.enable("p2").await.unwrap();

        h.registry.disable("p1").await.unwrap();
        // p2 is untouched by p1's teardown.
        assert_eq!(h.extensions.count_for_owner("p2").await, 2);
        assert!(h.scheduler.job_exists(&JobKey::new("tick", "p2")).await);

        let listed = h.registry.list().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, "p1");
        assert_eq!(listed[1].key, "p2");
    }
}
