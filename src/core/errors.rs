use thiserror::Error;

/// Unified error type for bulk request composition
#[derive(Debug, Error)]
pub enum BulkError {
    /// A `<id>.query` directive could not be compiled
    #[error("Invalid query for \"{key}\": {message}")]
    QueryCompile { key: String, message: String },

    /// A `source` names a request that was never declared
    #[error("Undefined request source \"{source_id}\"")]
    UndefinedSource { source_id: String },

    /// Following `source` pointers revisits a request
    #[error("Dependency loop: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    /// An `each` request without the source/query pair it iterates over
    #[error("Request \"{id}\" iterates with each=true but has no {missing}")]
    FanOutContract { id: String, missing: &'static str },

    /// Remote dispatch requested but not available
    #[error("{reason}")]
    RemoteUnsupported { remote: String, reason: String },

    /// The executor collaborator failed hard
    #[error("Request \"{id}\" to {url} failed: {source}")]
    Transport {
        id: String,
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// A request id was declared through sub-fields only
    #[error("Request \"{id}\" has no url")]
    MissingUrl { id: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BulkError {
    pub fn query_compile<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        Self::QueryCompile {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn undefined_source<S: Into<String>>(source_id: S) -> Self {
        Self::UndefinedSource {
            source_id: source_id.into(),
        }
    }

    pub fn dependency_cycle(path: Vec<String>) -> Self {
        Self::DependencyCycle { path }
    }

    pub fn fan_out_contract<S: Into<String>>(id: S, missing: &'static str) -> Self {
        Self::FanOutContract {
            id: id.into(),
            missing,
        }
    }

    /// No remote executor was configured on the engine
    pub fn remote_unconfigured<S: Into<String>>(remote: S) -> Self {
        Self::RemoteUnsupported {
            remote: remote.into(),
            reason: "This endpoint doesn't support remote requests".to_string(),
        }
    }

    /// The remote executor does not know the requested target
    pub fn unknown_remote<S: Into<String>>(remote: S) -> Self {
        let remote = remote.into();
        Self::RemoteUnsupported {
            reason: format!("Unknown remote \"{}\"", remote),
            remote,
        }
    }

    pub fn transport<I: Into<String>, U: Into<String>>(id: I, url: U, source: anyhow::Error) -> Self {
        Self::Transport {
            id: id.into(),
            url: url.into(),
            source,
        }
    }

    pub fn missing_url<S: Into<String>>(id: S) -> Self {
        Self::MissingUrl { id: id.into() }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is reported to the caller as a bad request
    pub fn is_bad_request(&self) -> bool {
        !matches!(self, Self::Configuration { .. } | Self::Internal { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::QueryCompile { .. } => "query",
            Self::UndefinedSource { .. } | Self::DependencyCycle { .. } => "graph",
            Self::FanOutContract { .. } => "fan_out",
            Self::RemoteUnsupported { .. } => "remote",
            Self::Transport { .. } => "transport",
            Self::MissingUrl { .. } => "directive",
            Self::Configuration { .. } => "configuration",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, BulkError>;

impl From<serde_json::Error> for BulkError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("json serialization failed: {}", err))
    }
}

impl From<serde_yaml::Error> for BulkError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<tokio::task::JoinError> for BulkError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("request task aborted: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message() {
        let err = BulkError::dependency_cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Dependency loop: a -> b -> a");
        assert_eq!(err.category(), "graph");
    }

    #[test]
    fn test_remote_messages() {
        assert_eq!(
            BulkError::remote_unconfigured("two").to_string(),
            "This endpoint doesn't support remote requests"
        );
        assert_eq!(
            BulkError::unknown_remote("three").to_string(),
            "Unknown remote \"three\""
        );
    }

    #[test]
    fn test_transport_keeps_source() {
        let err = BulkError::transport("a", "/x", anyhow::anyhow!("connection reset"));
        assert!(err.to_string().contains("connection reset"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_bad_request_classification() {
        assert!(BulkError::undefined_source("x").is_bad_request());
        assert!(BulkError::query_compile("a.query", "bad").is_bad_request());
        assert!(!BulkError::configuration("iteration_limit").is_bad_request());
        assert!(!BulkError::internal("join").is_bad_request());
    }
}
