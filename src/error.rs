//! Gateway error taxonomy.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced to callers of the orchestrator.
///
/// `Clone` because one batch failure is fanned out to every member.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// No backend is registered under this id. Caller error, never retried.
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    /// The backend's circuit is open. The caller may try again later.
    #[error("backend '{0}' is unavailable (circuit open)")]
    BackendUnavailable(String),

    /// The backend did not answer in time, after all retries.
    #[error("backend '{backend}' timed out after {attempts} attempt(s)")]
    Timeout { backend: String, attempts: u32 },

    /// The backend answered with an error or could not be reached.
    #[error("backend '{backend}' failed: {message}")]
    BackendError { backend: String, message: String },

    /// A batch was rejected as too large even after being split.
    #[error("backend '{backend}' rejected a batch of {size} even after splitting")]
    BatchSplit { backend: String, size: usize },

    /// The request was cancelled before its batch was submitted.
    #[error("request {0} was cancelled")]
    Cancelled(Uuid),

    /// The inbound request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable kind, used in response bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::UnknownBackend(_) => "unknown_backend",
            GatewayError::BackendUnavailable(_) => "backend_unavailable",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::BackendError { .. } => "backend_error",
            GatewayError::BatchSplit { .. } => "batch_split_error",
            GatewayError::Cancelled(_) => "cancelled",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::Internal(_) => "internal",
        }
    }
}
