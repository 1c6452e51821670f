//! Convenience result type alias for PlugHub.

use crate::error::PlatformError;

/// A specialized `Result` type for PlugHub operations.
///
/// Defined so that every crate does not need to spell out
/// `Result<T, PlatformError>`.
pub type PlatformResult<T> = Result<T, PlatformError>;
