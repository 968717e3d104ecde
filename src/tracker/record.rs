//! Result records.

use serde::Serialize;
use uuid::Uuid;

use crate::registry::Pattern;

/// How a request was (or was not) sent to its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Sent on its own, synchronously.
    Immediate,
    /// Sent as a member of a batch.
    Batched,
    /// Turned away before any backend call.
    Rejected,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Immediate => "immediate",
            DispatchMode::Batched => "batched",
            DispatchMode::Rejected => "rejected",
        }
    }
}

/// Terminal outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    /// Succeeded, but only after at least one retry or resubmission.
    Retried,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Retried => "retried",
        }
    }

    /// Success on the first attempt or after retries.
    pub fn from_attempts(attempts: u32) -> Self {
        if attempts > 1 {
            Outcome::Retried
        } else {
            Outcome::Success
        }
    }
}

/// One line of the append-only result log, written once per request.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    pub request_id: Uuid,
    pub backend_id: String,
    /// Registered pattern of the backend; `None` when the backend is unknown.
    pub pattern: Option<Pattern>,
    pub mode: DispatchMode,
    pub processing_time_ms: u64,
    pub outcome: Outcome,
    pub attempts: u32,
    pub batch_id: Option<Uuid>,
    pub error: Option<String>,
}
