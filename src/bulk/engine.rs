use crate::bulk::aggregate::{aggregate, BulkOutput};
use crate::bulk::directive::{parse_directives, Directives};
use crate::bulk::dispatch::{Credentials, Dispatcher, LocalExecutor, RemoteExecutor};
use crate::bulk::fan_out::FanOutLimits;
use crate::bulk::graph::validate;
use crate::bulk::query::QueryCache;
use crate::bulk::scheduler::{self, ScheduleContext};
use crate::core::config::{BulkConfig, RouteConfig};
use crate::core::errors::Result;
use crate::transport::BulkResponse;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Builder for [`BulkEngine`]
pub struct BulkEngineBuilder {
    config: BulkConfig,
    local: Arc<dyn LocalExecutor>,
    remote: Option<Arc<dyn RemoteExecutor>>,
    queries: Option<Arc<QueryCache>>,
}

impl BulkEngineBuilder {
    pub fn config(mut self, config: BulkConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable remote dispatch through `remote`
    pub fn remote(mut self, remote: Arc<dyn RemoteExecutor>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Use a dedicated query cache instead of the process-wide JSONPath one
    pub fn query_cache(mut self, queries: Arc<QueryCache>) -> Self {
        self.queries = Some(queries);
        self
    }

    pub fn build(self) -> Result<BulkEngine> {
        self.config.validate()?;
        Ok(BulkEngine {
            dispatcher: Dispatcher::new(self.local, self.remote),
            queries: self.queries.unwrap_or_else(QueryCache::global),
            config: self.config,
        })
    }
}

/// Composes bulk calls: parse, validate, schedule, aggregate
pub struct BulkEngine {
    config: BulkConfig,
    dispatcher: Dispatcher,
    queries: Arc<QueryCache>,
}

impl BulkEngine {
    pub fn builder(local: Arc<dyn LocalExecutor>) -> BulkEngineBuilder {
        BulkEngineBuilder {
            config: BulkConfig::default(),
            local,
            remote: None,
            queries: None,
        }
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    /// Path the host should mount the bulk endpoint on
    pub fn path(&self) -> &str {
        &self.config.path
    }

    pub fn route(&self) -> &RouteConfig {
        &self.config.route
    }

    pub fn parse<I, K, V>(&self, directives: I) -> Result<Directives>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        parse_directives(directives, &self.queries, &self.config.debug_key)
    }

    /// Run one bulk call described by `directives`.
    ///
    /// Compile and graph errors are returned before anything is dispatched;
    /// otherwise the first failing request decides the error.
    #[instrument(skip_all, fields(call_id = %cuid2::create_id()))]
    pub async fn execute<I, K, V>(&self, directives: I, credentials: Credentials) -> Result<BulkOutput>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let Directives { mut graph, flags } = self.parse(directives)?;
        validate(&graph)?;
        info!(requests = graph.len(), debug = flags.debug, "Executing bulk call");

        let ctx = Arc::new(ScheduleContext {
            dispatcher: self.dispatcher.clone(),
            credentials,
            limits: FanOutLimits {
                iteration_limit: self.config.iteration_limit,
                concurrency: self.config.fan_out_concurrency,
            },
        });
        let results = scheduler::execute(&mut graph, ctx).await?;

        let output = aggregate(&graph, results, flags.debug)?;
        info!(results = output.results.len(), "Bulk call completed");
        Ok(output)
    }

    /// Run a bulk call and shape the outcome into a transport response
    pub async fn handle<I, K, V>(&self, directives: I, credentials: Credentials) -> BulkResponse
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let result = self.execute(directives, credentials).await;
        if let Err(e) = &result {
            warn!(category = e.category(), error = %e, "Bulk call rejected");
        }
        BulkResponse::from_result(result)
    }
}
