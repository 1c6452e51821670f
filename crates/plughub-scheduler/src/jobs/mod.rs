//! Built-in job handler implementations.

pub mod retention;

pub use retention::HistoryRetentionHandler;
