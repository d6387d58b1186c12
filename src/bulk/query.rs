//! Path-query capability.
//!
//! Query directives are compiled once per distinct expression text and shared
//! process-wide through [`QueryCache`]. The default compiler speaks JSONPath
//! (RFC 9535) via `serde_json_path`; hosts can plug their own [`QueryCompiler`].

use dashmap::DashMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use serde_json_path::JsonPath;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A compiled, immutable path-query expression
pub trait CompiledQuery: Send + Sync + fmt::Debug {
    /// Evaluate against a document, producing the matched values in order
    fn evaluate(&self, document: &Value) -> Vec<Value>;
}

/// Turns expression text into a [`CompiledQuery`]
pub trait QueryCompiler: Send + Sync {
    fn compile(&self, expression: &str) -> anyhow::Result<Arc<dyn CompiledQuery>>;
}

/// JSONPath compiler backed by `serde_json_path`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPathCompiler;

#[derive(Debug)]
struct JsonPathQuery(JsonPath);

impl CompiledQuery for JsonPathQuery {
    fn evaluate(&self, document: &Value) -> Vec<Value> {
        self.0.query(document).all().into_iter().cloned().collect()
    }
}

impl QueryCompiler for JsonPathCompiler {
    fn compile(&self, expression: &str) -> anyhow::Result<Arc<dyn CompiledQuery>> {
        let path = JsonPath::parse(expression)?;
        Ok(Arc::new(JsonPathQuery(path)))
    }
}

/// A query directive: the text the caller sent plus its compiled form
#[derive(Clone)]
pub struct Query {
    text: String,
    compiled: Arc<dyn CompiledQuery>,
}

impl Query {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn evaluate(&self, document: &Value) -> Vec<Value> {
        self.compiled.evaluate(document)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Query").field(&self.text).finish()
    }
}

// Debug metadata shows the expression text, never the compiled form.
impl Serialize for Query {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

/// Memoizes compiled expressions keyed by their literal text
pub struct QueryCache {
    compiler: Arc<dyn QueryCompiler>,
    compiled: DashMap<String, Arc<dyn CompiledQuery>>,
}

lazy_static::lazy_static! {
    static ref GLOBAL_QUERY_CACHE: Arc<QueryCache> =
        Arc::new(QueryCache::new(Arc::new(JsonPathCompiler)));
}

impl QueryCache {
    pub fn new(compiler: Arc<dyn QueryCompiler>) -> Self {
        Self {
            compiler,
            compiled: DashMap::new(),
        }
    }

    /// The process-wide JSONPath cache
    pub fn global() -> Arc<QueryCache> {
        GLOBAL_QUERY_CACHE.clone()
    }

    /// Look up `expression`, compiling it on a miss.
    ///
    /// Two callers missing on the same text at once both compile; the second
    /// insert simply replaces an equivalent entry.
    pub fn get_or_compile(&self, expression: &str) -> anyhow::Result<Query> {
        if let Some(compiled) = self.compiled.get(expression) {
            return Ok(Query {
                text: expression.to_string(),
                compiled: compiled.clone(),
            });
        }

        let compiled = self.compiler.compile(expression)?;
        debug!(expression, "Compiled query expression");
        self.compiled
            .insert(expression.to_string(), compiled.clone());
        Ok(Query {
            text: expression.to_string(),
            compiled,
        })
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    pub fn contains(&self, expression: &str) -> bool {
        self.compiled.contains_key(expression)
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.compiled.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCompiler {
        calls: AtomicUsize,
    }

    impl QueryCompiler for CountingCompiler {
        fn compile(&self, expression: &str) -> anyhow::Result<Arc<dyn CompiledQuery>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            JsonPathCompiler.compile(expression)
        }
    }

    #[test]
    fn test_jsonpath_extracts_in_document_order() {
        let query = JsonPathCompiler.compile("$.*.id").unwrap();
        let doc = json!([{"id": 1}, {"id": 2}, {"name": "no id"}]);
        assert_eq!(query.evaluate(&doc), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_malformed_expression_is_rejected() {
        assert!(JsonPathCompiler.compile("$.[").is_err());
        assert!(JsonPathCompiler.compile("not a path").is_err());
    }

    #[test]
    fn test_cache_compiles_each_text_once() {
        let compiler = Arc::new(CountingCompiler {
            calls: AtomicUsize::new(0),
        });
        let cache = QueryCache::new(compiler.clone());

        let first = cache.get_or_compile("$.*.id").unwrap();
        let second = cache.get_or_compile("$.*.id").unwrap();
        cache.get_or_compile("$.*.by").unwrap();

        assert_eq!(compiler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(first.text(), second.text());
    }

    #[test]
    fn test_failed_compile_is_not_cached() {
        let cache = QueryCache::new(Arc::new(JsonPathCompiler));
        assert!(cache.get_or_compile("$[").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_query_serializes_as_text() {
        let query = QueryCache::global().get_or_compile("$.items[*]").unwrap();
        assert_eq!(serde_json::to_value(&query).unwrap(), json!("$.items[*]"));
        assert!(QueryCache::global().contains("$.items[*]"));
    }
}
