//! Outbound calls to model backends.
//!
//! # Wire Format
//! ```text
//! single:  POST <endpoint>  body: <payload>            → 2xx body: <result>
//! batch:   POST <endpoint>  body: [<payload>, ...]     → 2xx body: [<result>, ...]
//! ```
//! Batch results must be order-aligned with the request array.
//!
//! # Design Decisions
//! - Deadlines are enforced by the dispatchers around these calls, so every
//!   `ModelClient` gets identical timeout semantics
//! - 413 is reported separately so the accumulator can split the batch

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::error::GatewayError;
use crate::registry::BackendDescriptor;

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendCallError {
    #[error("timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BackendCallError {
    /// Network-level failure that may succeed if sent again unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendCallError::Timeout | BackendCallError::Transport(_))
    }

    /// Whether the failure says something about backend health.
    /// A 4xx means the backend is up and rejected the input.
    pub fn counts_against_backend(&self) -> bool {
        match self {
            BackendCallError::Status { status, .. } => !(400..500).contains(status),
            BackendCallError::PayloadTooLarge => false,
            _ => true,
        }
    }

    /// Map to the caller-facing error after `attempts` tries.
    pub fn into_gateway_error(self, backend: &str, attempts: u32) -> GatewayError {
        match self {
            BackendCallError::Timeout => GatewayError::Timeout {
                backend: backend.to_string(),
                attempts,
            },
            other => GatewayError::BackendError {
                backend: backend.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Transport to model backends.
#[async_trait]
pub trait ModelClient: Send + Sync + 'static {
    /// Send one payload.
    async fn invoke(
        &self,
        backend: &BackendDescriptor,
        payload: &Value,
    ) -> Result<Value, BackendCallError>;

    /// Send many payloads in one call; results come back in the same order.
    async fn invoke_batch(
        &self,
        backend: &BackendDescriptor,
        payloads: &[Value],
    ) -> Result<Vec<Value>, BackendCallError>;
}

/// JSON-over-HTTP client backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct HttpModelClient {
    http: reqwest::Client,
}

impl HttpModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn post(&self, backend: &BackendDescriptor, body: &Value) -> Result<Value, BackendCallError> {
        let mut request = self.http.post(backend.endpoint.clone()).json(body);
        if let Some(token) = &backend.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();

        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(BackendCallError::PayloadTooLarge);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendCallError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BackendCallError::Malformed(e.to_string()))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> BackendCallError {
    if e.is_timeout() {
        BackendCallError::Timeout
    } else {
        BackendCallError::Transport(e.to_string())
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn invoke(
        &self,
        backend: &BackendDescriptor,
        payload: &Value,
    ) -> Result<Value, BackendCallError> {
        self.post(backend, payload).await
    }

    async fn invoke_batch(
        &self,
        backend: &BackendDescriptor,
        payloads: &[Value],
    ) -> Result<Vec<Value>, BackendCallError> {
        let body = Value::Array(payloads.to_vec());
        match self.post(backend, &body).await? {
            Value::Array(results) => Ok(results),
            other => Err(BackendCallError::Malformed(format!(
                "expected a JSON array of results, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
