//! Executor boundary: where resolved requests leave the engine.

use crate::core::errors::{BulkError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Authentication credentials of the inbound bulk call, passed through untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials(Option<Arc<Value>>);

impl Credentials {
    pub fn new(value: Value) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn as_value(&self) -> Option<&Value> {
        self.0.as_deref()
    }
}

/// A single resolved sub-request
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub method: http::Method,
    pub url: String,
    pub credentials: Credentials,
}

impl DispatchRequest {
    pub fn get<S: Into<String>>(url: S, credentials: Credentials) -> Self {
        Self {
            method: http::Method::GET,
            url: url.into(),
            credentials,
        }
    }
}

/// Runs a request against the host process without a socket round trip.
///
/// A returned value may itself be an error-shaped payload from the route; it
/// is treated as data. Only `Err` counts as a failure.
#[async_trait]
pub trait LocalExecutor: Send + Sync {
    async fn inject(&self, request: &DispatchRequest) -> anyhow::Result<Value>;
}

/// Failure modes of a remote dispatch
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Unknown remote \"{0}\"")]
    NotFound(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Delegates requests to named remote targets
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn dispatch(&self, remote: &str, request: &DispatchRequest) -> std::result::Result<Value, RemoteError>;
}

/// Routes a resolved URL to the local or remote collaborator
#[derive(Clone)]
pub struct Dispatcher {
    local: Arc<dyn LocalExecutor>,
    remote: Option<Arc<dyn RemoteExecutor>>,
}

impl Dispatcher {
    pub fn new(local: Arc<dyn LocalExecutor>, remote: Option<Arc<dyn RemoteExecutor>>) -> Self {
        Self { local, remote }
    }

    /// Fails fast when `remote` is requested but no remote executor exists
    pub fn check_remote(&self, remote: Option<&str>) -> Result<()> {
        match (remote, &self.remote) {
            (Some(name), None) => Err(BulkError::remote_unconfigured(name)),
            _ => Ok(()),
        }
    }

    pub async fn dispatch(
        &self,
        id: &str,
        url: &str,
        remote: Option<&str>,
        credentials: &Credentials,
    ) -> Result<Value> {
        let request = DispatchRequest::get(url, credentials.clone());

        match remote {
            Some(name) => {
                let executor = self
                    .remote
                    .as_ref()
                    .ok_or_else(|| BulkError::remote_unconfigured(name))?;
                debug!(request_id = id, url, remote = name, "Dispatching remote request");
                executor.dispatch(name, &request).await.map_err(|e| match e {
                    RemoteError::NotFound(name) => BulkError::unknown_remote(name),
                    RemoteError::Transport(source) => BulkError::transport(id, url, source),
                })
            }
            None => {
                debug!(request_id = id, url, "Dispatching local request");
                self.local
                    .inject(&request)
                    .await
                    .map_err(|e| BulkError::transport(id, url, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoLocal;

    #[async_trait]
    impl LocalExecutor for EchoLocal {
        async fn inject(&self, request: &DispatchRequest) -> anyhow::Result<Value> {
            if request.url == "/down" {
                anyhow::bail!("route crashed");
            }
            Ok(json!({
                "url": request.url,
                "method": request.method.as_str(),
                "user": request.credentials.as_value().cloned(),
            }))
        }
    }

    struct OneRemote;

    #[async_trait]
    impl RemoteExecutor for OneRemote {
        async fn dispatch(&self, remote: &str, request: &DispatchRequest) -> std::result::Result<Value, RemoteError> {
            match remote {
                "two" => Ok(json!({"remote": remote, "url": request.url})),
                "flaky" => Err(RemoteError::Transport(anyhow::anyhow!("timed out"))),
                other => Err(RemoteError::NotFound(other.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_local_dispatch_carries_credentials() {
        let dispatcher = Dispatcher::new(Arc::new(EchoLocal), None);
        let creds = Credentials::new(json!({"user": "jane"}));
        let value = dispatcher.dispatch("a", "/x", None, &creds).await.unwrap();
        assert_eq!(value, json!({"url": "/x", "method": "GET", "user": {"user": "jane"}}));
    }

    #[tokio::test]
    async fn test_local_failure_is_transport_error() {
        let dispatcher = Dispatcher::new(Arc::new(EchoLocal), None);
        let err = dispatcher
            .dispatch("a", "/down", None, &Credentials::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Transport { .. }));
        assert!(err.to_string().contains("route crashed"));
    }

    #[tokio::test]
    async fn test_remote_without_executor() {
        let dispatcher = Dispatcher::new(Arc::new(EchoLocal), None);
        assert!(dispatcher.check_remote(None).is_ok());
        assert!(dispatcher.check_remote(Some("two")).is_err());

        let err = dispatcher
            .dispatch("a", "/x", Some("two"), &Credentials::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "This endpoint doesn't support remote requests");
    }

    #[tokio::test]
    async fn test_remote_dispatch_outcomes() {
        let dispatcher = Dispatcher::new(Arc::new(EchoLocal), Some(Arc::new(OneRemote)));
        let creds = Credentials::anonymous();

        let value = dispatcher.dispatch("a", "/users", Some("two"), &creds).await.unwrap();
        assert_eq!(value, json!({"remote": "two", "url": "/users"}));

        let err = dispatcher.dispatch("a", "/users", Some("three"), &creds).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown remote \"three\"");

        let err = dispatcher.dispatch("a", "/users", Some("flaky"), &creds).await.unwrap_err();
        assert!(matches!(err, BulkError::Transport { .. }));
    }
}
