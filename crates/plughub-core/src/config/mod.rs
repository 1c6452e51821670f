//! Platform configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. The resulting [`PlatformConfig`] is constructed once at
//! startup and passed explicitly to the components that need it; nothing in
//! the host reads configuration from ambient global state.

pub mod logging;
pub mod plugins;
pub mod scheduler;

use serde::{Deserialize, Serialize};

use self::logging::LoggingConfig;
use self::plugins::PluginsConfig;
use self::scheduler::SchedulerConfig;

use crate::error::PlatformError;
use crate::version::{Version, VersionOracle};

/// Root platform configuration.
///
/// Top-level deserialization target for the merged TOML configuration
/// (default file plus `PLUGHUB_`-prefixed environment overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Plugin API versioning.
    #[serde(default)]
    pub api: ApiConfig,
    /// Plugin system settings.
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Job scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Platform API version window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// The platform's current API version.
    #[serde(default = "default_api_version")]
    pub version: String,
    /// The oldest API version the platform still supports.
    #[serde(default = "default_minimum_supported")]
    pub minimum_supported: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            version: default_api_version(),
            minimum_supported: default_minimum_supported(),
        }
    }
}

impl ApiConfig {
    /// Build the version oracle from the configured version window.
    pub fn oracle(&self) -> Result<VersionOracle, PlatformError> {
        let current = Version::parse(&self.version)?;
        let minimum = Version::parse(&self.minimum_supported)?;
        Ok(VersionOracle::new(current, minimum))
    }
}

impl PlatformConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration file (if present) with environment
    /// variables prefixed with `PLUGHUB__`.
    pub fn load() -> Result<Self, PlatformError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("PLUGHUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            plugins: PluginsConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_api_version() -> String {
    "1.0.0".to_string()
}

fn default_minimum_supported() -> String {
    "1.0.0".to_string()
}
