//! Inference API handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::gateway::Submission;
use crate::http::request::InferBody;
use crate::http::response::{ApiError, CancelledResponse, QueuedResponse};
use crate::http::results::{CancelOutcome, PollState};
use crate::http::server::AppState;

#[derive(Debug, Serialize)]
struct PendingBody {
    request_id: Uuid,
    backend_id: String,
    batch_id: Uuid,
    status: &'static str,
}

/// `POST /v1/infer`
pub async fn infer(
    State(state): State<AppState>,
    body: Result<Json<InferBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    body.validate()?;

    let submission = state
        .orchestrator
        .submit(&body.backend_id, body.payload, body.urgent)
        .await?;

    match submission {
        Submission::Ready(response) => Ok(Json(response).into_response()),
        Submission::Queued(pending) if body.wait => {
            tracing::debug!(request_id = %pending.request_id(), "Holding connection for batch result");
            Ok(Json(pending.await?).into_response())
        }
        Submission::Queued(pending) => {
            let queued = QueuedResponse::new(
                pending.request_id(),
                pending.batch_id(),
                pending.backend_id().to_string(),
            );
            state.results.track(pending);
            Ok((StatusCode::ACCEPTED, Json(queued)).into_response())
        }
    }
}

/// `GET /v1/requests/{id}`
pub async fn poll(State(state): State<AppState>, Path(request_id): Path<Uuid>) -> Result<Response, ApiError> {
    match state.results.poll(request_id) {
        None => Err(ApiError::NotFound(format!("no result for request {request_id}"))),
        Some(PollState::Pending { backend_id, batch_id }) => Ok((
            StatusCode::ACCEPTED,
            Json(PendingBody {
                request_id,
                backend_id,
                batch_id,
                status: "pending",
            }),
        )
            .into_response()),
        Some(PollState::Done(Ok(response))) => Ok(Json(response).into_response()),
        Some(PollState::Done(Err(error))) => Err(error.into()),
    }
}

/// `DELETE /v1/requests/{id}`
pub async fn cancel(State(state): State<AppState>, Path(request_id): Path<Uuid>) -> Result<Response, ApiError> {
    match state.results.cancel(request_id) {
        CancelOutcome::Cancelled => Ok(Json(CancelledResponse {
            request_id,
            status: "cancelled",
        })
        .into_response()),
        CancelOutcome::TooLate => Err(ApiError::Conflict(format!(
            "request {request_id} was already submitted or has finished"
        ))),
        CancelOutcome::Unknown => Err(ApiError::NotFound(format!("no queued request {request_id}"))),
    }
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
