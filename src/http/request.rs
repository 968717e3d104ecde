//! Inbound request bodies.
//!
//! # Design Decisions
//! - The backend may be named `backend_id`, `model` or `model_name`
//! - `urgent` only matters for Hybrid backends
//! - `wait: true` holds the connection until a queued request finishes

use serde::Deserialize;
use serde_json::Value;

use crate::error::GatewayError;

/// Body of `POST /v1/infer`.
#[derive(Debug, Clone, Deserialize)]
pub struct InferBody {
    #[serde(alias = "model", alias = "model_name")]
    pub backend_id: String,
    pub payload: Value,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default)]
    pub wait: bool,
}

impl InferBody {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.backend_id.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("backend_id must not be empty".into()));
        }
        if self.payload.is_null() {
            return Err(GatewayError::InvalidRequest("payload is required".into()));
        }
        Ok(())
    }
}
