//! Fan-out execution for `each` requests.
//!
//! The request is dispatched once per extracted element through a fixed-size
//! worker pool. Records come back in completion order, not input order.

use crate::bulk::directive::RequestSpec;
use crate::bulk::dispatch::{Credentials, Dispatcher};
use crate::bulk::query::Query;
use crate::bulk::template;
use crate::core::errors::{BulkError, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Bounds applied to one fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutLimits {
    pub iteration_limit: usize,
    pub concurrency: usize,
}

impl Default for FanOutLimits {
    fn default() -> Self {
        Self {
            iteration_limit: 10,
            concurrency: 3,
        }
    }
}

/// Outcome of dispatching one element
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FanOutRecord {
    Completed { from: Value, result: Value },
    Failed { from: Value, error: String },
}

impl FanOutRecord {
    pub fn from_value(&self) -> &Value {
        match self {
            Self::Completed { from, .. } | Self::Failed { from, .. } => from,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Everything a fan-out produced, including debug bookkeeping
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    /// Per-element records in completion order
    pub records: Vec<FanOutRecord>,
    /// URLs dispatched, in input order
    pub real_urls: Vec<String>,
    /// URLs past the iteration limit, never dispatched
    pub skipped_urls: Vec<String>,
}

impl FanOutReport {
    pub fn result_value(&self) -> Value {
        Value::Array(
            self.records
                .iter()
                .map(|record| serde_json::to_value(record).unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// Checks that an `each` request names what it iterates over
pub fn each_inputs(spec: &RequestSpec) -> Result<(&str, &Query)> {
    let source = spec
        .source
        .as_deref()
        .ok_or_else(|| BulkError::fan_out_contract(&spec.id, "source"))?;
    let query = spec
        .query
        .as_ref()
        .ok_or_else(|| BulkError::fan_out_contract(&spec.id, "query"))?;
    Ok((source, query))
}

/// Dispatch `template` once per element of `params`.
///
/// Per-element failures are recorded inline and never fail the fan-out. A
/// remote target that is not configured, or not known to the remote executor,
/// fails it as a whole.
pub async fn run_each(
    spec: &RequestSpec,
    template: &str,
    params: Vec<Value>,
    dispatcher: &Dispatcher,
    credentials: &Credentials,
    limits: FanOutLimits,
) -> Result<FanOutReport> {
    let mut report = FanOutReport::default();
    if params.is_empty() {
        debug!(request_id = %spec.id, "Nothing to iterate");
        return Ok(report);
    }

    dispatcher.check_remote(spec.remote.as_deref())?;

    let mut params = params;
    let skipped = if params.len() > limits.iteration_limit {
        params.split_off(limits.iteration_limit)
    } else {
        Vec::new()
    };
    report.skipped_urls = skipped
        .iter()
        .map(|element| template::resolve(template, std::slice::from_ref(element)).0)
        .collect();
    if !report.skipped_urls.is_empty() {
        debug!(
            request_id = %spec.id,
            skipped = report.skipped_urls.len(),
            limit = limits.iteration_limit,
            "Iteration limit reached"
        );
    }

    let work: Vec<(Value, String)> = params
        .into_iter()
        .map(|element| {
            let url = template::resolve(template, std::slice::from_ref(&element)).0;
            (element, url)
        })
        .collect();
    report.real_urls = work.iter().map(|(_, url)| url.clone()).collect();

    // An unknown remote target fails the whole request, other errors stay per element
    let remote = spec.remote.as_deref();
    report.records = stream::iter(work)
        .map(|(element, url)| async move {
            match dispatcher.dispatch(&spec.id, &url, remote, credentials).await {
                Ok(result) => Ok(FanOutRecord::Completed {
                    from: element,
                    result,
                }),
                Err(e @ BulkError::RemoteUnsupported { .. }) => Err(e),
                Err(e) => {
                    warn!(request_id = %spec.id, url = %url, error = %e, "Iteration failed");
                    Ok(FanOutRecord::Failed {
                        from: element,
                        error: e.to_string(),
                    })
                }
            }
        })
        .buffer_unordered(limits.concurrency.max(1))
        .try_collect::<Vec<_>>()
        .await?;

    Ok(report)
}
