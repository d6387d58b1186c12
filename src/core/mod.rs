// Shared infrastructure for the bulk engine

pub mod config;
pub mod errors;

// Re-export commonly used types
pub use config::{BulkConfig, RouteConfig, CONTROL_PREFIX};
pub use errors::{BulkError, Result};
