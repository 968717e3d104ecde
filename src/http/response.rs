//! Response bodies and error mapping.
//!
//! # Status Mapping
//! - `UnknownBackend` → 404, `BackendUnavailable` → 503, `Timeout` → 504
//! - `BackendError`, `BatchSplit`, `Internal` → 500
//! - `Cancelled` → 409, `InvalidRequest` → 400

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::registry::RegistryError;

/// 202 body for a request waiting in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedResponse {
    pub request_id: Uuid,
    pub batch_id: Uuid,
    pub backend_id: String,
    pub status: &'static str,
    pub poll_url: String,
}

impl QueuedResponse {
    pub fn new(request_id: Uuid, batch_id: Uuid, backend_id: String) -> Self {
        Self {
            request_id,
            batch_id,
            backend_id,
            status: "queued",
            poll_url: format!("/v1/requests/{request_id}"),
        }
    }
}

/// 200 body for a successful cancel.
#[derive(Debug, Clone, Serialize)]
pub struct CancelledResponse {
    pub request_id: Uuid,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

pub fn status_for(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::UnknownBackend(_) => StatusCode::NOT_FOUND,
        GatewayError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::BackendError { .. }
        | GatewayError::BatchSplit { .. }
        | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GatewayError::Cancelled(_) => StatusCode::CONFLICT,
        GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Errors from endpoints that are not a dispatch outcome.
#[derive(Debug)]
pub enum ApiError {
    Gateway(GatewayError),
    Registry(RegistryError),
    NotFound(String),
    Conflict(String),
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        ApiError::Gateway(e)
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::Registry(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Gateway(e) => return e.into_response(),
            ApiError::Registry(e) => {
                let status = match &e {
                    RegistryError::AlreadyRegistered(_) => StatusCode::CONFLICT,
                    RegistryError::NotRegistered(_) => StatusCode::NOT_FOUND,
                    RegistryError::InvalidDescriptor { .. } => StatusCode::BAD_REQUEST,
                };
                (status, "registry", e.to_string())
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, "conflict", message),
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}
