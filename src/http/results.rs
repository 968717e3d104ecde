//! Retention of deferred results for polling and cancellation.
//!
//! Every queued request answered with 202 gets a slot here. A background task
//! per slot waits on the `PendingResult` and stores the outcome; finished slots
//! stay pollable for the configured TTL and are then swept.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::dispatch::{CancelHandle, PendingResult};
use crate::error::GatewayError;
use crate::gateway::InferenceResponse;

#[derive(Debug)]
enum Slot {
    Pending {
        backend_id: String,
        batch_id: Uuid,
        cancel: CancelHandle,
    },
    Done {
        result: Result<InferenceResponse, GatewayError>,
        finished_at: Instant,
    },
}

/// What a poll finds.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Pending { backend_id: String, batch_id: Uuid },
    Done(Result<InferenceResponse, GatewayError>),
}

/// Result of a cancel attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The batch was already submitted or the request already finished.
    TooLate,
    Unknown,
}

#[derive(Debug, Default)]
pub struct ResultStore {
    slots: DashMap<Uuid, Slot>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a queued request's future and record its outcome.
    pub fn track(self: &Arc<Self>, pending: PendingResult) -> Uuid {
        let request_id = pending.request_id();
        self.slots.insert(
            request_id,
            Slot::Pending {
                backend_id: pending.backend_id().to_string(),
                batch_id: pending.batch_id(),
                cancel: pending.cancel_handle(),
            },
        );

        let store = Arc::clone(self);
        tokio::spawn(async move {
            let result = pending.await;
            store.slots.insert(
                request_id,
                Slot::Done {
                    result,
                    finished_at: Instant::now(),
                },
            );
        });
        request_id
    }

    pub fn poll(&self, request_id: Uuid) -> Option<PollState> {
        self.slots.get(&request_id).map(|slot| match &*slot {
            Slot::Pending {
                backend_id,
                batch_id,
                ..
            } => PollState::Pending {
                backend_id: backend_id.clone(),
                batch_id: *batch_id,
            },
            Slot::Done { result, .. } => PollState::Done(result.clone()),
        })
    }

    pub fn cancel(&self, request_id: Uuid) -> CancelOutcome {
        // clone the handle out so the shard lock is not held while cancelling
        let handle = match self.slots.get(&request_id).as_deref() {
            None => return CancelOutcome::Unknown,
            Some(Slot::Done { .. }) => return CancelOutcome::TooLate,
            Some(Slot::Pending { cancel, .. }) => cancel.clone(),
        };

        if handle.cancel() {
            CancelOutcome::Cancelled
        } else {
            CancelOutcome::TooLate
        }
    }

    pub fn pending_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Pending { .. }))
            .count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop finished results older than `ttl`. Returns how many were removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| match slot {
            Slot::Pending { .. } => true,
            Slot::Done { finished_at, .. } => finished_at.elapsed() < ttl,
        });
        before.saturating_sub(self.slots.len())
    }

    /// Sweep on an interval until shutdown.
    pub async fn run_sweeper(
        self: Arc<Self>,
        interval: Duration,
        ttl: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep(ttl);
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.len(), "Swept expired results");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Result sweeper stopped");
    }
}
