//! Plugin system configuration.

use serde::{Deserialize, Serialize};

/// Plugin system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Whether installed plugins are enabled automatically at startup.
    #[serde(default = "default_true")]
    pub auto_enable: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self { auto_enable: true }
    }
}

fn default_true() -> bool {
    true
}
