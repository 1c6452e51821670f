//! # plughub-core
//!
//! Core crate for PlugHub. Contains the unified error taxonomy, platform
//! configuration schemas, the semantic-version oracle, and shared types
//! (pagination) used by the registry and scheduler crates.
//!
//! This crate has **no** internal dependencies on other PlugHub crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;
pub mod version;

pub use error::PlatformError;
pub use result::PlatformResult;
pub use version::{Version, VersionOracle};
