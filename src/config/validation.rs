//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check backend identity (unique, non-empty ids)
//! - Validate value ranges (timeouts > 0, batch sizes >= 1)
//! - Validate endpoints and bind addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{BackendConfig, GatewayConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("backend id must not be empty")]
    EmptyBackendId,
    #[error("backend '{0}' is declared more than once")]
    DuplicateBackend(String),
    #[error("backend '{id}': invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        id: String,
        endpoint: String,
        reason: String,
    },
    #[error("backend '{id}': {field} must be greater than zero")]
    ZeroValue { id: String, field: &'static str },
    #[error("{0} must be greater than zero")]
    ZeroSetting(&'static str),
    #[error("retries.multiplier must be at least 1")]
    InvalidMultiplier,
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),
}

/// Validate a whole configuration, collecting every problem.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroSetting("listener.request_timeout_secs"));
    }
    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::ZeroSetting("circuit_breaker.failure_threshold"));
    }
    if config.circuit_breaker.cooldown_ms == 0 {
        errors.push(ValidationError::ZeroSetting("circuit_breaker.cooldown_ms"));
    }
    if config.retries.multiplier == 0 {
        errors.push(ValidationError::InvalidMultiplier);
    }
    if config.tracker.capacity == 0 {
        errors.push(ValidationError::ZeroSetting("tracker.capacity"));
    }

    errors.extend(validate_backends(&config.backends));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the backend table on its own (also used by hot reload and admin).
pub fn validate_backends(backends: &[BackendConfig]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for backend in backends {
        errors.extend(validate_backend(backend));
        if !backend.id.is_empty() && !seen.insert(backend.id.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.id.clone()));
        }
    }
    errors
}

/// Validate a single backend entry.
pub fn validate_backend(backend: &BackendConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if backend.id.trim().is_empty() {
        errors.push(ValidationError::EmptyBackendId);
    }

    match Url::parse(&backend.endpoint) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::InvalidEndpoint {
            id: backend.id.clone(),
            endpoint: backend.endpoint.clone(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        }),
        Err(e) => errors.push(ValidationError::InvalidEndpoint {
            id: backend.id.clone(),
            endpoint: backend.endpoint.clone(),
            reason: e.to_string(),
        }),
    }

    if backend.timeout_ms == 0 {
        errors.push(ValidationError::ZeroValue {
            id: backend.id.clone(),
            field: "timeout_ms",
        });
    }
    if backend.max_batch_size == 0 {
        errors.push(ValidationError::ZeroValue {
            id: backend.id.clone(),
            field: "max_batch_size",
        });
    }
    if backend.max_batch_wait_ms == 0 {
        errors.push(ValidationError::ZeroValue {
            id: backend.id.clone(),
            field: "max_batch_wait_ms",
        });
    }

    errors
}
