//! Turns engine results into transport-level responses.
//!
//! Success is a `200` carrying the output document. Errors raised while
//! serving a call are bad requests and carry a `{statusCode, error, message}`
//! body; anything else is reported as an internal server error.

use crate::bulk::aggregate::BulkOutput;
use crate::core::errors::{BulkError, Result};
use http::{header, HeaderValue, Response, StatusCode};
use serde_json::{json, Value};
use tracing::error;

pub const APPLICATION_JSON: &str = "application/json";

#[derive(Debug, Clone, PartialEq)]
pub struct BulkResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl BulkResponse {
    pub fn ok(output: &BulkOutput) -> Self {
        match output.to_value() {
            Ok(body) => Self {
                status: StatusCode::OK,
                body,
            },
            Err(e) => Self::error(&e),
        }
    }

    pub fn error(err: &BulkError) -> Self {
        let status = if err.is_bad_request() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            body: json!({
                "statusCode": status.as_u16(),
                "error": status.canonical_reason().unwrap_or_default(),
                "message": err.to_string(),
            }),
        }
    }

    pub fn from_result(result: Result<BulkOutput>) -> Self {
        match result {
            Ok(output) => Self::ok(&output),
            Err(e) => Self::error(&e),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Build the HTTP response for the host server
    pub fn into_http(self) -> Response<Vec<u8>> {
        let body = self.body.to_string().into_bytes();
        Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON))
            .body(body)
            .unwrap_or_else(|e| {
                error!("Failed to build bulk response: {}", e);
                let mut fallback = Response::new(b"Internal Server Error".to_vec());
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
    }
}

impl From<Result<BulkOutput>> for BulkResponse {
    fn from(result: Result<BulkOutput>) -> Self {
        Self::from_result(result)
    }
}
