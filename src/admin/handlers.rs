use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::config::BackendConfig;
use crate::error::GatewayError;
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::registry::{BackendDescriptor, Pattern};
use crate::resilience::{CircuitSnapshot, CircuitStatus};
use crate::tracker::{ResultRecord, TrackerStats};

/// Recent records included in the status view.
const STATUS_RECENT: usize = 20;

#[derive(Serialize)]
pub struct QueueDepth {
    pub backend: String,
    pub depth: usize,
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub backends: usize,
    pub pending_results: usize,
    pub tracker: TrackerStats,
    pub queues: Vec<QueueDepth>,
    pub recent: Vec<ResultRecord>,
}

#[derive(Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub endpoint: String,
    pub pattern: Pattern,
    pub timeout_ms: u64,
    pub max_batch_size: usize,
    pub max_batch_wait_ms: u64,
    pub circuit: CircuitStatus,
    pub queue_depth: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let orchestrator = &state.orchestrator;
    let mut recent = state.recent.records();
    let skip = recent.len().saturating_sub(STATUS_RECENT);
    recent.drain(..skip);

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        backends: orchestrator.registry().len(),
        pending_results: state.results.pending_count(),
        tracker: orchestrator.tracker().stats(),
        queues: orchestrator
            .accumulator()
            .queue_depths()
            .into_iter()
            .map(|(backend, depth)| QueueDepth { backend, depth })
            .collect(),
        recent,
    })
}

pub async fn get_backends(State(state): State<AppState>) -> Json<Vec<BackendStatus>> {
    let orchestrator = &state.orchestrator;
    let table = orchestrator.registry().snapshot();

    let mut statuses: Vec<_> = table
        .values()
        .map(|b| BackendStatus {
            id: b.id.clone(),
            endpoint: b.endpoint.to_string(),
            pattern: b.pattern,
            timeout_ms: b.timeout.as_millis() as u64,
            max_batch_size: b.max_batch_size,
            max_batch_wait_ms: b.max_batch_wait.as_millis() as u64,
            circuit: orchestrator.breakers().get(&b.id).status(),
            queue_depth: orchestrator.accumulator().queue_depth(&b.id),
        })
        .collect();
    statuses.sort_by(|a, b| a.id.cmp(&b.id));

    Json(statuses)
}

pub async fn register_backend(
    State(state): State<AppState>,
    body: Result<Json<BackendConfig>, JsonRejection>,
) -> Result<(StatusCode, Json<BackendConfig>), ApiError> {
    let Json(config) = body.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    let descriptor = BackendDescriptor::try_from(&config)?;
    let echoed = BackendConfig::from(&descriptor);

    state.orchestrator.registry().register(descriptor)?;
    Ok((StatusCode::CREATED, Json(echoed)))
}

pub async fn replace_backend(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<BackendConfig>, JsonRejection>,
) -> Result<Json<BackendConfig>, ApiError> {
    let Json(config) = body.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    if config.id != id {
        return Err(GatewayError::InvalidRequest(format!(
            "body id '{}' does not match path id '{id}'",
            config.id
        ))
        .into());
    }

    let descriptor = BackendDescriptor::try_from(&config)?;
    let echoed = BackendConfig::from(&descriptor);
    state.orchestrator.registry().replace(descriptor)?;
    Ok(Json(echoed))
}

pub async fn get_circuits(State(state): State<AppState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.orchestrator.breakers().snapshots())
}
