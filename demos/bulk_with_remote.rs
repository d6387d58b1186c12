//! Bulk call spanning an in-process server and a remote one.
//!
//! Run with `cargo run --example bulk_with_remote`.

use anyhow::Result;
use async_trait::async_trait;
use dagger_bulk::{BulkEngine, Credentials, DispatchRequest, LocalExecutor, RemoteError, RemoteExecutor};
use percent_encoding::percent_decode_str;
use serde_json::{json, Value};
use std::sync::Arc;

fn ids(url: &str) -> Vec<String> {
    let Some((_, query)) = url.split_once('?') else {
        return Vec::new();
    };
    query
        .split('&')
        .filter_map(|pair| pair.strip_prefix("ids="))
        .flat_map(|raw| {
            percent_decode_str(raw)
                .decode_utf8_lossy()
                .split(',')
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn select(db: &Value, url: &str) -> Value {
    Value::Array(ids(url).iter().filter_map(|id| db.get(id).cloned()).collect())
}

/// Server one: listing and entities, reached without a socket
struct ServerOne;

#[async_trait]
impl LocalExecutor for ServerOne {
    async fn inject(&self, request: &DispatchRequest) -> Result<Value> {
        let path = request.url.split('?').next().unwrap_or_default();
        match path {
            "/listing" => Ok(json!([{"id": 123}, {"id": 234}])),
            "/entities" => Ok(select(
                &json!({
                    "123": {"id": 123, "name": "Foo", "by": 1001},
                    "234": {"id": 234, "name": "Bar", "by": 1002}
                }),
                &request.url,
            )),
            _ => Ok(json!({"statusCode": 404, "error": "Not Found"})),
        }
    }
}

/// Server two only accepts the remote name "two"
struct ServerTwo;

#[async_trait]
impl RemoteExecutor for ServerTwo {
    async fn dispatch(&self, remote: &str, request: &DispatchRequest) -> std::result::Result<Value, RemoteError> {
        if remote != "two" {
            return Err(RemoteError::NotFound(remote.to_string()));
        }
        Ok(select(
            &json!({
                "1001": {"id": 1001, "name": "Jane"},
                "1002": {"id": 1002, "name": "John"}
            }),
            &request.url,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let engine = BulkEngine::builder(Arc::new(ServerOne))
        .remote(Arc::new(ServerTwo))
        .build()?;

    let response = engine
        .handle(
            [
                ("listing", "/listing"),
                ("entities", "/entities?ids=${,}"),
                ("entities.source", "listing"),
                ("entities.query", "$.*.id"),
                ("authors", "/users?ids=${,}"),
                ("authors.remote", "two"),
                ("authors.source", "entities"),
                ("authors.query", "$.*.by"),
                ("_debug", "true"),
            ],
            Credentials::new(json!({"user": "demo"})),
        )
        .await;

    println!("{} {}", response.status, serde_json::to_string_pretty(&response.body)?);
    Ok(())
}
