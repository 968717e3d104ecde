//! Hybrid router: urgent requests go real-time, the rest are batched.

use std::sync::Arc;

use crate::dispatch::batch::BatchAccumulator;
use crate::dispatch::realtime::RealTimeDispatcher;
use crate::error::GatewayError;
use crate::gateway::request::{InferenceRequest, Submission};
use crate::registry::BackendDescriptor;

pub struct HybridRouter {
    realtime: Arc<RealTimeDispatcher>,
    accumulator: Arc<BatchAccumulator>,
}

impl HybridRouter {
    pub fn new(realtime: Arc<RealTimeDispatcher>, accumulator: Arc<BatchAccumulator>) -> Self {
        Self {
            realtime,
            accumulator,
        }
    }

    /// Route on the request's urgency alone.
    pub async fn route(
        &self,
        request: InferenceRequest,
        backend: Arc<BackendDescriptor>,
    ) -> Result<Submission, GatewayError> {
        if request.urgent {
            tracing::debug!(request_id = %request.id, backend = %backend.id, "Hybrid: urgent, dispatching now");
            self.realtime
                .dispatch(request, &backend)
                .await
                .map(Submission::Ready)
        } else {
            tracing::debug!(request_id = %request.id, backend = %backend.id, "Hybrid: deferrable, batching");
            Ok(Submission::Queued(self.accumulator.enqueue(request, backend)))
        }
    }
}
