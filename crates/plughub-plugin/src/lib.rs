//! # plughub-plugin
//!
//! Plugin framework for PlugHub. Provides:
//!
//! - Plugin descriptors and the install/resolve/start/stop/uninstall
//!   lifecycle state machine
//! - A versioned extension registry with weight-ordered lookups
//! - The plugin activation contract and the context through which plugins
//!   declare their extensions and scheduled jobs as data

pub mod context;
pub mod descriptor;
pub mod extension;
pub mod registry;
pub mod traits;

pub use context::PluginContext;
pub use descriptor::{PluginDescriptor, PluginState};
pub use extension::{
    ApiVersionRange, ExtensionPointType, ExtensionRegistration, ExtensionRegistry,
};
pub use registry::PluginRegistry;
pub use traits::Plugin;
