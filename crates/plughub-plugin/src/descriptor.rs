//! Plugin descriptors and lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

use plughub_core::version::Version;

use crate::extension::ExtensionPointType;

/// State of a plugin in its lifecycle.
///
/// Transitions follow this pattern:
///
/// ```text
///     INSTALLED -> RESOLVED -> STARTING -> ACTIVE
///                      ^                     |
///                      |                     v
///                      +----- STOPPING <-----+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Installed but not yet resolved; dependencies may not be satisfied.
    Installed,
    /// Resolved and ready to start; version requirements are satisfied.
    Resolved,
    /// In the process of starting.
    Starting,
    /// Fully active and operational.
    Active,
    /// In the process of stopping.
    Stopping,
}

impl PluginState {
    /// Whether the plugin is enabled (active or starting).
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Active | Self::Starting)
    }

    /// Whether the plugin is usable (resolved, starting, or active).
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Resolved | Self::Starting | Self::Active)
    }

    /// The state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Resolved => "resolved",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata describing an installed plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin key (e.g. `"com.example.audit"`).
    pub key: String,
    /// Human-readable plugin name.
    pub name: String,
    /// The plugin's own version.
    pub version: Version,
    /// Minimum platform version the plugin requires.
    pub min_platform_version: Version,
    /// Vendor name.
    pub vendor: String,
    /// Current lifecycle state. Mutated only by the plugin registry.
    pub state: PluginState,
    /// Extension point types the plugin declares it can provide.
    pub exports: Vec<ExtensionPointType>,
}

impl PluginDescriptor {
    /// Create a descriptor in the Installed state.
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        version: Version,
        min_platform_version: Version,
        vendor: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            version,
            min_platform_version,
            vendor: vendor.into(),
            state: PluginState::Installed,
            exports: Vec::new(),
        }
    }

    /// Declare an exported extension point type.
    pub fn exporting(mut self, point: ExtensionPointType) -> Self {
        self.exports.push(point);
        self
    }
}
