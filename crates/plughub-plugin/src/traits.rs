//! The plugin activation contract.

use async_trait::async_trait;

use crate::context::PluginContext;
use crate::descriptor::PluginDescriptor;

/// Trait every hosted plugin implements.
///
/// A plugin is an opaque module handle: the host drives `activate` and
/// `deactivate` and never inspects plugin internals. During activation the
/// plugin declares its extensions and scheduled jobs through the supplied
/// [`PluginContext`]; on deactivation it must **not** unregister them itself,
/// the registry tears everything down before this hook runs.
#[async_trait]
pub trait Plugin: Send + Sync + std::fmt::Debug {
    /// The plugin's descriptor, as declared in its manifest.
    fn descriptor(&self) -> PluginDescriptor;

    /// Called while the plugin is in the Starting state. Registering
    /// extensions and jobs happens here. Returning an error rolls the
    /// plugin back to Resolved and removes anything partially registered.
    async fn activate(&self, ctx: &PluginContext) -> Result<(), String>;

    /// Called after the plugin's extensions and jobs have been removed,
    /// while the plugin is in the Stopping state. Errors are logged, not
    /// propagated.
    async fn deactivate(&self) -> Result<(), String>;
}
