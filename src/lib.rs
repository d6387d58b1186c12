// Core infrastructure modules
pub mod core;

// Request composition: directives -> graph -> scheduled dispatch -> output
pub mod bulk;

// Response shaping for the host server
pub mod transport;

// Re-exports for convenience
pub use bulk::{
    BulkEngine, BulkEngineBuilder, BulkOutput, Credentials, DispatchRequest, FanOutRecord,
    LocalExecutor, RemoteError, RemoteExecutor, RequestGraph, RequestSpec,
};
pub use crate::core::{BulkConfig, BulkError, Result, RouteConfig};
pub use transport::BulkResponse;
