use crate::bulk::directive::RequestGraph;
use crate::core::errors::{BulkError, Result};

/// Validates the source references of every request.
///
/// Each request has at most one `source`, so the graph is a forest of chains:
/// walking the chain from every id finds both dangling references and loops.
/// The reported loop starts and ends at the revisited id.
pub fn validate(graph: &RequestGraph) -> Result<()> {
    for id in graph.ids() {
        let mut walked = vec![id.as_str()];
        let mut current = graph.get(id);

        while let Some(source) = current.and_then(|spec| spec.source.as_deref()) {
            let Some(next) = graph.get(source) else {
                return Err(BulkError::undefined_source(source));
            };
            if let Some(start) = walked.iter().position(|seen| *seen == source) {
                let mut path: Vec<String> = walked[start..].iter().map(|s| s.to_string()).collect();
                path.push(source.to_string());
                return Err(BulkError::dependency_cycle(path));
            }
            walked.push(source);
            current = Some(next);
        }
    }
    Ok(())
}

/// Depth of the `source` chain above `id`, for a validated graph
pub fn chain_depth(graph: &RequestGraph, id: &str) -> usize {
    let mut depth = 0;
    let mut current = graph.get(id).and_then(|spec| spec.source.as_deref());
    while let Some(source) = current {
        depth += 1;
        current = graph.get(source).and_then(|spec| spec.source.as_deref());
    }
    depth
}
