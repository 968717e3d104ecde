//! Request and response types flowing through the orchestrator.

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::dispatch::batch::PendingResult;
use crate::error::GatewayError;
use crate::registry::Pattern;

/// Lifecycle of a single request.
///
/// ```text
/// Submitted → Dispatching → {Succeeded | Failed | Queued}
/// Queued → BatchSubmitted → {Succeeded | Failed}
/// Submitted → Failed        (rejected before dispatch)
/// Queued → Failed           (cancelled before submission)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Submitted,
    Dispatching,
    Queued,
    BatchSubmitted,
    Succeeded,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Succeeded | RequestState::Failed)
    }

    pub fn can_advance_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (*self, next),
            (Submitted, Dispatching)
                | (Submitted, Failed)
                | (Dispatching, Succeeded | Failed | Queued)
                | (Queued, BatchSubmitted | Failed)
                | (BatchSubmitted, Succeeded | Failed)
        )
    }
}

/// A request owned by whichever component is currently processing it.
#[derive(Debug)]
pub struct InferenceRequest {
    pub id: Uuid,
    pub backend_id: String,
    pub payload: Value,
    pub urgent: bool,
    pub submitted_at: Instant,
    state: RequestState,
}

impl InferenceRequest {
    pub fn new(backend_id: impl Into<String>, payload: Value, urgent: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend_id: backend_id.into(),
            payload,
            urgent,
            submitted_at: Instant::now(),
            state: RequestState::Submitted,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Move to `next`. Illegal moves are logged and ignored, so a terminal
    /// request can never be dispatched again.
    pub fn advance(&mut self, next: RequestState) -> bool {
        if !self.state.can_advance_to(next) {
            tracing::error!(
                request_id = %self.id,
                from = ?self.state,
                to = ?next,
                "Illegal request state transition"
            );
            return false;
        }
        tracing::trace!(request_id = %self.id, from = ?self.state, to = ?next, "Request state");
        self.state = next;
        true
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.submitted_at.elapsed().as_millis() as u64
    }
}

/// Successful result of one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResponse {
    pub request_id: Uuid,
    pub backend_id: String,
    pub pattern: Pattern,
    pub result: Value,
    /// Set when the result came back as part of a batch.
    pub batch_id: Option<Uuid>,
    pub attempts: u32,
    pub processing_time_ms: u64,
}

/// What `submit` hands back: a finished result or a handle to a queued one.
#[derive(Debug)]
pub enum Submission {
    Ready(InferenceResponse),
    Queued(PendingResult),
}

impl Submission {
    pub fn is_pending(&self) -> bool {
        matches!(self, Submission::Queued(_))
    }

    /// Wait for the final result regardless of path.
    pub async fn resolve(self) -> Result<InferenceResponse, GatewayError> {
        match self {
            Submission::Ready(response) => Ok(response),
            Submission::Queued(pending) => pending.await,
        }
    }
}
