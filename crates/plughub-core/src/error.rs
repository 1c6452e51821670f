//! Unified platform error taxonomy for PlugHub.
//!
//! Every synchronous failure mode of the host core is a named variant here.
//! Validation errors (malformed versions, duplicate keys, invalid triggers)
//! are returned to the caller and never retried automatically; job-body
//! failures never reach this type at all — the scheduler absorbs them and
//! records them in the execution history instead.

use thiserror::Error;

/// Platform-level errors surfaced by the plugin registry, extension
/// registry, job scheduler, and execution-history ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// A version string could not be parsed (empty or non-numeric segment).
    #[error("invalid version format: '{0}'")]
    InvalidVersionFormat(String),

    /// A plugin's minimum platform version is outside the supported range.
    #[error(
        "plugin '{key}' requires platform version {required}, \
         host supports {supported_floor} through {current}"
    )]
    IncompatiblePluginVersion {
        /// The plugin key.
        key: String,
        /// The minimum platform version the plugin declared.
        required: String,
        /// The oldest platform version the host still supports.
        supported_floor: String,
        /// The host's current platform version.
        current: String,
    },

    /// A plugin with the same key is already installed.
    #[error("plugin key '{0}' is already installed")]
    DuplicatePluginKey(String),

    /// The requested lifecycle transition is not legal from the current state.
    #[error("illegal lifecycle transition for plugin '{key}': {from} -> {requested}")]
    InvalidLifecycleTransition {
        /// The plugin key.
        key: String,
        /// The state the plugin is currently in.
        from: String,
        /// The transition that was requested.
        requested: String,
    },

    /// Uninstall was requested while the plugin is still active.
    #[error("plugin '{0}' is still active; disable it before uninstalling")]
    PluginStillActive(String),

    /// No plugin with the given key is installed.
    #[error("plugin '{0}' is not installed")]
    PluginNotFound(String),

    /// The plugin's activation hook failed; partial state was rolled back.
    #[error("activation of plugin '{key}' failed: {reason}")]
    PluginActivationFailed {
        /// The plugin key.
        key: String,
        /// The reason reported by the activation hook.
        reason: String,
    },

    /// An extension with the same (owner, type, key) is already registered.
    #[error("extension '{key}' of type '{extension_type}' already registered by plugin '{owner}'")]
    DuplicateExtensionKey {
        /// The owning plugin key.
        owner: String,
        /// The extension point type.
        extension_type: String,
        /// The extension key.
        key: String,
    },

    /// The platform API version falls outside the registration's declared range.
    #[error(
        "extension '{key}' was built against API {declared_range}, \
         platform API is {current}"
    )]
    IncompatibleApiVersion {
        /// The extension key.
        key: String,
        /// The declared API version range, rendered for diagnostics.
        declared_range: String,
        /// The platform's current API version.
        current: String,
    },

    /// A trigger definition failed validation.
    #[error("invalid trigger specification: {0}")]
    InvalidTriggerSpec(String),

    /// A job with the same (name, group) is already scheduled.
    #[error("job '{0}' is already scheduled")]
    DuplicateJobKey(String),

    /// The execution-history id does not exist or is already terminal.
    #[error("unknown or already finalized history id {0}")]
    UnknownHistoryId(u64),

    /// Configuration could not be loaded or deserialized.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<config::ConfigError> for PlatformError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
