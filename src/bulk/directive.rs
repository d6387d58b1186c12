//! Directive parsing.
//!
//! A bulk call arrives as a flat map of dotted keys: `<id>` carries the URL
//! template and `<id>.<field>` the remaining request fields. Keys starting with
//! [`CONTROL_PREFIX`] are control flags rather than request fields.

use crate::bulk::query::{Query, QueryCache};
use crate::core::config::CONTROL_PREFIX;
use crate::core::errors::{BulkError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// One declared sub-request
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    #[serde(skip)]
    pub id: String,
    #[serde(rename = "url", skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub each: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub suppress: bool,

    // Filled in during execution, reported with debug metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub real_urls: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_urls: Vec<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl RequestSpec {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url_template = Some(url.into());
        self
    }

    pub fn with_source<S: Into<String>>(mut self, source: S) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_remote<S: Into<String>>(mut self, remote: S) -> Self {
        self.remote = Some(remote.into());
        self
    }

    pub fn each(mut self) -> Self {
        self.each = true;
        self
    }

    pub fn suppressed(mut self) -> Self {
        self.suppress = true;
        self
    }
}

/// Request specs keyed by id, ordered so validation is deterministic
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct RequestGraph {
    specs: BTreeMap<String, RequestSpec>,
}

impl RequestGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: RequestSpec) {
        self.specs.insert(spec.id.clone(), spec);
    }

    pub fn get(&self, id: &str) -> Option<&RequestSpec> {
        self.specs.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RequestSpec> {
        self.specs.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.specs.keys()
    }

    pub fn specs(&self) -> impl Iterator<Item = &RequestSpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    fn entry(&mut self, id: &str) -> &mut RequestSpec {
        self.specs
            .entry(id.to_string())
            .or_insert_with(|| RequestSpec::new(id))
    }
}

impl FromIterator<RequestSpec> for RequestGraph {
    fn from_iter<T: IntoIterator<Item = RequestSpec>>(iter: T) -> Self {
        let mut graph = RequestGraph::new();
        for spec in iter {
            graph.insert(spec);
        }
        graph
    }
}

/// Control flags found alongside the request directives
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlFlags {
    pub debug: bool,
    /// Control keys the engine does not interpret
    pub other: BTreeMap<String, String>,
}

/// Result of parsing one bulk call's directive set
#[derive(Debug, Clone, Default)]
pub struct Directives {
    pub graph: RequestGraph,
    pub flags: ControlFlags,
}

/// Request fields addressable through `<id>.<suffix>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectiveField {
    Source,
    Query,
    Remote,
    Each,
    Suppress,
}

impl DirectiveField {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "source" => Some(Self::Source),
            "query" => Some(Self::Query),
            "remote" => Some(Self::Remote),
            "each" => Some(Self::Each),
            "suppress" => Some(Self::Suppress),
            _ => None,
        }
    }

    fn apply(self, spec: &mut RequestSpec, key: &str, value: &str, queries: &QueryCache) -> Result<()> {
        match self {
            Self::Source => spec.source = non_empty(value),
            Self::Remote => spec.remote = non_empty(value),
            Self::Query => {
                spec.query = match non_empty(value) {
                    Some(text) => Some(
                        queries
                            .get_or_compile(&text)
                            .map_err(|e| BulkError::query_compile(key, e.to_string()))?,
                    ),
                    None => None,
                }
            }
            Self::Each => spec.each = value == "true",
            Self::Suppress => spec.suppress = value == "true",
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Group a flat directive map into request specs.
///
/// Fails on the first query that does not compile; nothing is executed in
/// that case.
pub fn parse_directives<I, K, V>(directives: I, queries: &QueryCache, debug_key: &str) -> Result<Directives>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut parsed = Directives::default();

    for (key, value) in directives {
        let (key, value) = (key.as_ref(), value.as_ref());

        if key.starts_with(CONTROL_PREFIX) {
            if key == debug_key {
                parsed.flags.debug = value == "true";
            } else {
                parsed.flags.other.insert(key.to_string(), value.to_string());
            }
            continue;
        }

        let mut segments = key.split('.');
        let id = segments.next().unwrap_or_default();
        let suffix = segments.next();
        let extra = segments.next();
        let spec = parsed.graph.entry(id);

        match (suffix, extra) {
            (None, _) => spec.url_template = Some(value.to_string()),
            (Some(suffix), None) => match DirectiveField::from_suffix(suffix) {
                Some(field) => field.apply(spec, key, value, queries)?,
                None => debug!(key, "Ignoring unrecognized directive"),
            },
            (Some(_), Some(_)) => debug!(key, "Ignoring nested directive"),
        }
    }

    Ok(parsed)
}
