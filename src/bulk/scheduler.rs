use crate::bulk::directive::{RequestGraph, RequestSpec};
use crate::bulk::dispatch::{Credentials, Dispatcher};
use crate::bulk::fan_out::{self, FanOutLimits};
use crate::bulk::graph::chain_depth;
use crate::bulk::template;
use crate::core::errors::{BulkError, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Shared, read-only state handed to every request task
#[derive(Clone)]
pub struct ScheduleContext {
    pub dispatcher: Dispatcher,
    pub credentials: Credentials,
    pub limits: FanOutLimits,
}

/// What one request task produced
#[derive(Debug, Clone)]
pub struct SpecOutcome {
    pub id: String,
    pub value: Value,
    pub real_url: Option<String>,
    pub real_urls: Vec<String>,
    pub skipped_urls: Vec<String>,
}

impl SpecOutcome {
    fn new(id: &str, value: Value) -> Self {
        Self {
            id: id.to_string(),
            value,
            real_url: None,
            real_urls: Vec::new(),
            skipped_urls: Vec::new(),
        }
    }
}

type TaskHandle = JoinHandle<(String, Result<SpecOutcome>)>;

/// Executes a validated graph.
///
/// Requests without a source start immediately; a request starts once its
/// source completed. After the first failure nothing new is launched, tasks
/// already running are drained and the first error is returned. Debug fields
/// on the graph's specs are filled in from each outcome.
pub async fn execute(graph: &mut RequestGraph, ctx: Arc<ScheduleContext>) -> Result<BTreeMap<String, Value>> {
    let mut completed: HashMap<String, Arc<Value>> = HashMap::new();
    let mut launched: HashSet<String> = HashSet::new();
    let mut running: FuturesUnordered<TaskHandle> = FuturesUnordered::new();
    let mut first_error: Option<BulkError> = None;

    loop {
        if first_error.is_none() {
            let ready: Vec<RequestSpec> = graph
                .specs()
                .filter(|spec| !launched.contains(&spec.id))
                .filter(|spec| match &spec.source {
                    Some(source) => completed.contains_key(source),
                    None => true,
                })
                .cloned()
                .collect();

            for spec in ready {
                let source_result = spec
                    .source
                    .as_ref()
                    .and_then(|source| completed.get(source).cloned());
                launched.insert(spec.id.clone());
                info!(
                    request_id = %spec.id,
                    depth = chain_depth(graph, &spec.id),
                    active = running.len() + 1,
                    "Launching request"
                );

                let ctx = ctx.clone();
                running.push(tokio::spawn(async move {
                    let id = spec.id.clone();
                    let url = spec.url_template.clone().unwrap_or_default();
                    // A panicking collaborator fails its request like any other task failure
                    let outcome = match AssertUnwindSafe(run_spec(spec, source_result, ctx))
                        .catch_unwind()
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(panic) => Err(BulkError::transport(
                            &id,
                            url,
                            anyhow::anyhow!("request task panicked: {}", panic_message(panic.as_ref())),
                        )),
                    };
                    (id, outcome)
                }));
            }
        }

        let Some(joined) = running.next().await else {
            break;
        };

        match joined {
            Ok((id, Ok(outcome))) => {
                info!(request_id = %id, active = running.len(), "Request completed");
                if let Some(spec) = graph.get_mut(&id) {
                    spec.real_url = outcome.real_url;
                    spec.real_urls = outcome.real_urls;
                    spec.skipped_urls = outcome.skipped_urls;
                }
                completed.insert(id, Arc::new(outcome.value));
            }
            Ok((id, Err(e))) => record_failure(&mut first_error, Some(&id), e, running.len()),
            Err(join_error) => record_failure(&mut first_error, None, join_error.into(), running.len()),
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    Ok(completed
        .into_iter()
        .map(|(id, value)| (id, Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone())))
        .collect())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn record_failure(first_error: &mut Option<BulkError>, id: Option<&str>, error: BulkError, active: usize) {
    if first_error.is_none() {
        warn!(
            request_id = id.unwrap_or("<unknown>"),
            category = error.category(),
            error = %error,
            draining = active,
            "Request failed, no further requests will start"
        );
        *first_error = Some(error);
    } else {
        debug!(request_id = id.unwrap_or("<unknown>"), error = %error, "Discarding later failure");
    }
}

/// The work of a single request: resolve its URL, then dispatch it once or
/// once per extracted element.
#[instrument(skip_all, fields(request_id = %spec.id))]
async fn run_spec(spec: RequestSpec, source_result: Option<Arc<Value>>, ctx: Arc<ScheduleContext>) -> Result<SpecOutcome> {
    if spec.each {
        let (source, query) = fan_out::each_inputs(&spec)?;
        let template = spec
            .url_template
            .as_deref()
            .ok_or_else(|| BulkError::missing_url(&spec.id))?;
        let document = source_result
            .ok_or_else(|| BulkError::internal(format!("result of \"{}\" is not available", source)))?;
        let params = query.evaluate(&document);

        let report = fan_out::run_each(&spec, template, params, &ctx.dispatcher, &ctx.credentials, ctx.limits).await?;
        let mut outcome = SpecOutcome::new(&spec.id, report.result_value());
        outcome.real_urls = report.real_urls;
        outcome.skipped_urls = report.skipped_urls;
        return Ok(outcome);
    }

    let template = spec
        .url_template
        .as_deref()
        .ok_or_else(|| BulkError::missing_url(&spec.id))?;

    let mut url = template.to_string();
    let mut real_url = None;
    if let (Some(_), Some(query), Some(document)) = (&spec.source, &spec.query, &source_result) {
        if template::has_placeholder(template) {
            let params = query.evaluate(document);
            let (resolved, changed) = template::resolve(template, &params);
            if changed {
                real_url = Some(resolved.clone());
            }
            url = resolved;
        } else {
            debug!(url = %url, "No placeholder to resolve");
        }
    }

    let value = ctx
        .dispatcher
        .dispatch(&spec.id, &url, spec.remote.as_deref(), &ctx.credentials)
        .await?;

    let mut outcome = SpecOutcome::new(&spec.id, value);
    outcome.real_url = real_url;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::dispatch::{DispatchRequest, LocalExecutor};
    use crate::bulk::query::QueryCache;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Routes keyed by path; records the order requests started and finished
    #[derive(Default)]
    struct Routes {
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LocalExecutor for Routes {
        async fn inject(&self, request: &DispatchRequest) -> anyhow::Result<Value> {
            self.log.lock().unwrap().push(format!("start {}", request.url));
            let value = match request.url.as_str() {
                "/x" => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    json!([{"id": 1}, {"id": 2}])
                }
                "/slow" => {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    json!("slow done")
                }
                "/fail" => anyhow::bail!("upstream unavailable"),
                "/panic" => panic!("route exploded"),
                other => json!({"echo": other}),
            };
            self.log.lock().unwrap().push(format!("end {}", request.url));
            Ok(value)
        }
    }

    fn context(routes: Arc<Routes>) -> Arc<ScheduleContext> {
        Arc::new(ScheduleContext {
            dispatcher: Dispatcher::new(routes, None),
            credentials: Credentials::anonymous(),
            limits: FanOutLimits::default(),
        })
    }

    fn query(text: &str) -> crate::bulk::query::Query {
        QueryCache::global().get_or_compile(text).unwrap()
    }

    #[tokio::test]
    async fn test_dependent_waits_for_source() {
        let routes = Arc::new(Routes::default());
        let mut graph: RequestGraph = vec![
            RequestSpec::new("a").with_url("/x"),
            RequestSpec::new("b")
                .with_url("/y?id=${,}")
                .with_source("a")
                .with_query(query("$.*.id")),
        ]
        .into_iter()
        .collect();

        let results = execute(&mut graph, context(routes.clone())).await.unwrap();

        assert_eq!(results["b"], json!({"echo": "/y?id=1%2C2"}));
        assert_eq!(graph.get("b").unwrap().real_url.as_deref(), Some("/y?id=1%2C2"));
        assert!(graph.get("a").unwrap().real_url.is_none());

        let log = routes.log.lock().unwrap().clone();
        let a_end = log.iter().position(|l| l == "end /x").unwrap();
        let b_start = log.iter().position(|l| l.starts_with("start /y")).unwrap();
        assert!(a_end < b_start);
    }

    #[tokio::test]
    async fn test_independent_requests_run_concurrently() {
        let routes = Arc::new(Routes::default());
        let mut graph: RequestGraph = vec![
            RequestSpec::new("a").with_url("/slow"),
            RequestSpec::new("b").with_url("/x"),
        ]
        .into_iter()
        .collect();

        execute(&mut graph, context(routes.clone())).await.unwrap();

        let log = routes.log.lock().unwrap().clone();
        let started: Vec<_> = log.iter().take(2).cloned().collect();
        assert!(started.iter().all(|l| l.starts_with("start")));
    }

    #[tokio::test]
    async fn test_failure_blocks_dependents_but_drains_running() {
        let routes = Arc::new(Routes::default());
        let mut graph: RequestGraph = vec![
            RequestSpec::new("bad").with_url("/fail"),
            RequestSpec::new("after").with_url("/after").with_source("bad"),
            RequestSpec::new("slow").with_url("/slow"),
        ]
        .into_iter()
        .collect();

        let err = execute(&mut graph, context(routes.clone())).await.unwrap_err();
        assert!(err.to_string().contains("upstream unavailable"));

        let log = routes.log.lock().unwrap().clone();
        assert!(log.contains(&"end /slow".to_string()));
        assert!(!log.iter().any(|l| l.contains("/after")));
    }

    #[tokio::test]
    async fn test_literal_template_without_source_is_untouched() {
        let routes = Arc::new(Routes::default());
        let mut graph: RequestGraph = vec![RequestSpec::new("a").with_url("/raw?id=${,}")].into_iter().collect();

        let results = execute(&mut graph, context(routes)).await.unwrap();
        assert_eq!(results["a"], json!({"echo": "/raw?id=${,}"}));
        assert!(graph.get("a").unwrap().real_url.is_none());
    }

    #[tokio::test]
    async fn test_sourced_template_without_placeholder_is_untouched() {
        let routes = Arc::new(Routes::default());
        let mut graph: RequestGraph = vec![
            RequestSpec::new("a").with_url("/x"),
            RequestSpec::new("b")
                .with_url("/y?all=1")
                .with_source("a")
                .with_query(query("$.*.id")),
        ]
        .into_iter()
        .collect();

        let results = execute(&mut graph, context(routes)).await.unwrap();
        assert_eq!(results["b"], json!({"echo": "/y?all=1"}));
        assert!(graph.get("b").unwrap().real_url.is_none());
    }

    #[tokio::test]
    async fn test_panicking_route_is_a_bad_request() {
        let routes = Arc::new(Routes::default());
        let mut graph: RequestGraph = vec![RequestSpec::new("a").with_url("/panic")].into_iter().collect();

        let err = execute(&mut graph, context(routes)).await.unwrap_err();
        assert!(matches!(err, BulkError::Transport { .. }));
        assert!(err.is_bad_request());
        assert!(err.to_string().contains("route exploded"));
    }

    #[tokio::test]
    async fn test_missing_url_fails_the_call() {
        let routes = Arc::new(Routes::default());
        let mut graph: RequestGraph = vec![RequestSpec::new("a")].into_iter().collect();

        let err = execute(&mut graph, context(routes)).await.unwrap_err();
        assert!(matches!(err, BulkError::MissingUrl { .. }));
    }

    #[tokio::test]
    async fn test_each_contract_violation_is_a_task_failure() {
        let routes = Arc::new(Routes::default());
        let mut graph: RequestGraph = vec![
            RequestSpec::new("a").with_url("/x"),
            RequestSpec::new("b").with_url("/b/${.}").with_source("a").each(),
        ]
        .into_iter()
        .collect();

        let err = execute(&mut graph, context(routes)).await.unwrap_err();
        assert!(matches!(err, BulkError::FanOutContract { missing: "query", .. }));
    }
}
