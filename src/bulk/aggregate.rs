use crate::bulk::directive::RequestGraph;
use crate::core::errors::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Debug metadata attached when the debug flag is set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkMeta {
    /// The request specs as executed, queries shown as text
    pub requests: Value,
}

/// The combined document returned for one bulk call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<BulkMeta>,
    pub results: BTreeMap<String, Value>,
}

impl BulkOutput {
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Shape the settled results into the output document.
///
/// Suppressed requests are dropped here; they were still available to their
/// dependents while the graph executed.
pub fn aggregate(graph: &RequestGraph, mut results: BTreeMap<String, Value>, debug: bool) -> Result<BulkOutput> {
    for spec in graph.specs().filter(|spec| spec.suppress) {
        if results.remove(&spec.id).is_some() {
            debug!(request_id = %spec.id, "Suppressed from output");
        }
    }

    let meta = if debug {
        Some(BulkMeta {
            requests: serde_json::to_value(graph)?,
        })
    } else {
        None
    };

    Ok(BulkOutput { meta, results })
}
