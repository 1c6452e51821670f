//! Plugin context — the host services a plugin sees during activation.

use std::sync::Arc;

use plughub_core::result::PlatformResult;
use plughub_core::version::Version;
use plughub_scheduler::{JobDefinition, JobHandler, JobKey, JobScheduler, TriggerDefinition};

use crate::extension::{ExtensionPointType, ExtensionRegistration, ExtensionRegistry};

/// Context handed to a plugin's activation hook.
///
/// Everything a plugin contributes flows through here so the host can stamp
/// ownership and tear it all down again on deactivation. Plugins declare
/// extensions as plain data; there is no runtime scanning of plugin types.
#[derive(Clone)]
pub struct PluginContext {
    /// Key of the plugin being activated.
    plugin_key: String,
    /// The platform's extension registry.
    extensions: Arc<ExtensionRegistry>,
    /// The platform's job scheduler.
    scheduler: Arc<JobScheduler>,
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_key", &self.plugin_key)
            .finish()
    }
}

impl PluginContext {
    /// Create a context for one plugin.
    pub fn new(
        plugin_key: impl Into<String>,
        extensions: Arc<ExtensionRegistry>,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        Self {
            plugin_key: plugin_key.into(),
            extensions,
            scheduler,
        }
    }

    /// The key of the plugin this context belongs to.
    pub fn plugin_key(&self) -> &str {
        &self.plugin_key
    }

    /// Start an extension registration pre-stamped with this plugin's key.
    pub fn extension(
        &self,
        extension_type: ExtensionPointType,
        key: impl Into<String>,
        api_min: Version,
    ) -> ExtensionRegistration {
        ExtensionRegistration::new(&self.plugin_key, extension_type, key, api_min)
    }

    /// Register an extension on behalf of this plugin.
    ///
    /// The owner key is always overwritten with this context's plugin key; a
    /// plugin cannot register on another plugin's behalf.
    pub async fn register_extension(
        &self,
        mut registration: ExtensionRegistration,
    ) -> PlatformResult<()> {
        registration.owner_plugin_key = self.plugin_key.clone();
        self.extensions.register(registration).await
    }

    /// Register a scheduled-job extension and schedule its job under this
    /// plugin's ownership in one step.
    ///
    /// The registration must be of type [`ExtensionPointType::ScheduledJob`];
    /// the job is removed automatically when the plugin deactivates.
    pub async fn register_scheduled_job(
        &self,
        registration: ExtensionRegistration,
        definition: JobDefinition,
        trigger: TriggerDefinition,
        handler: Arc<dyn JobHandler>,
    ) -> PlatformResult<JobKey> {
        self.register_extension(registration).await?;
        self.scheduler
            .schedule_owned(Some(&self.plugin_key), definition, Some(trigger), handler)
            .await
    }
}
