//! # plugin-audit
//!
//! Audit logging plugin for PlugHub. Demonstrates the full consumer
//! contract: on activation it registers a dashboard widget fragment and an
//! `audit-cleanup` scheduled job (daily at 02:00) against an
//! externally-provided audit log; on deactivation the host tears both down.

pub mod cleanup;
pub mod plugin;
pub mod store;

pub use cleanup::AuditCleanupHandler;
pub use plugin::{AuditPlugin, PLUGIN_KEY};
pub use store::{AuditLog, InMemoryAuditLog};
