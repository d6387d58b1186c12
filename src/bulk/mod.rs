pub mod aggregate;
pub mod directive;
pub mod dispatch;
pub mod engine;
pub mod fan_out;
pub mod graph;
pub mod query;
pub mod scheduler;
pub mod template;

pub use aggregate::{BulkMeta, BulkOutput};
pub use directive::{parse_directives, ControlFlags, Directives, RequestGraph, RequestSpec};
pub use dispatch::{Credentials, DispatchRequest, Dispatcher, LocalExecutor, RemoteError, RemoteExecutor};
pub use engine::{BulkEngine, BulkEngineBuilder};
pub use fan_out::{FanOutLimits, FanOutRecord};
pub use query::{CompiledQuery, JsonPathCompiler, Query, QueryCache, QueryCompiler};
