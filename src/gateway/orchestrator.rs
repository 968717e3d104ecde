//! Pattern orchestrator: single entry point for every inference request.

use std::sync::Arc;

use serde_json::Value;

use crate::config::{BackendConfig, GatewayConfig};
use crate::dispatch::{BatchAccumulator, HybridRouter, ModelClient, RealTimeDispatcher};
use crate::error::GatewayError;
use crate::gateway::request::{InferenceRequest, RequestState, Submission};
use crate::registry::{BackendDescriptor, BackendRegistry, Pattern, RegistryError};
use crate::resilience::{BreakerSettings, CircuitBreakers, RetryPolicy};
use crate::tracker::{DispatchMode, Outcome, ResultRecord, ResultTracker};

pub struct PatternOrchestrator {
    registry: Arc<BackendRegistry>,
    breakers: Arc<CircuitBreakers>,
    realtime: Arc<RealTimeDispatcher>,
    accumulator: Arc<BatchAccumulator>,
    hybrid: HybridRouter,
    tracker: ResultTracker,
}

impl PatternOrchestrator {
    pub fn new(
        registry: Arc<BackendRegistry>,
        breakers: Arc<CircuitBreakers>,
        client: Arc<dyn ModelClient>,
        tracker: ResultTracker,
        retry: RetryPolicy,
    ) -> Self {
        let realtime = Arc::new(RealTimeDispatcher::new(
            client.clone(),
            breakers.clone(),
            tracker.clone(),
            retry.clone(),
        ));
        let accumulator = Arc::new(BatchAccumulator::new(
            client,
            breakers.clone(),
            tracker.clone(),
            retry,
        ));
        let hybrid = HybridRouter::new(realtime.clone(), accumulator.clone());

        Self {
            registry,
            breakers,
            realtime,
            accumulator,
            hybrid,
            tracker,
        }
    }

    /// Wire every component from a validated configuration.
    pub fn from_config(
        config: &GatewayConfig,
        client: Arc<dyn ModelClient>,
        tracker: ResultTracker,
    ) -> Result<Self, RegistryError> {
        let descriptors = descriptors_from(&config.backends)?;
        Ok(Self::new(
            Arc::new(BackendRegistry::from_descriptors(descriptors)),
            Arc::new(CircuitBreakers::new(BreakerSettings::from(&config.circuit_breaker))),
            client,
            tracker,
            RetryPolicy::from(&config.retries),
        ))
    }

    /// Accept a request and send it down its backend's pattern path.
    ///
    /// Real-time results (and their failures) come back directly. Batched
    /// requests come back as `Submission::Queued`; their failures resolve
    /// through the pending handle, never from here.
    pub async fn submit(
        &self,
        backend_id: &str,
        payload: Value,
        urgent: bool,
    ) -> Result<Submission, GatewayError> {
        let mut request = InferenceRequest::new(backend_id, payload, urgent);

        let backend = match self.registry.lookup(backend_id) {
            Ok(backend) => backend,
            Err(error) => {
                tracing::debug!(request_id = %request.id, backend = %backend_id, "Unknown backend");
                self.reject(&mut request, None, &error);
                return Err(error);
            }
        };

        // Immediate calls claim the probe slot now; queued work leaves it to the flush.
        let breaker = self.breakers.get(&backend.id);
        let admitted = if backend.pattern.dispatches_immediately(urgent) {
            breaker.allow()
        } else {
            breaker.admits_queued()
        };
        if !admitted {
            let error = GatewayError::BackendUnavailable(backend.id.clone());
            tracing::debug!(request_id = %request.id, backend = %backend.id, "Circuit open, rejecting");
            self.reject(&mut request, Some(backend.pattern), &error);
            return Err(error);
        }

        request.advance(RequestState::Dispatching);
        tracing::debug!(
            request_id = %request.id,
            backend = %backend.id,
            pattern = %backend.pattern,
            urgent,
            "Dispatching request"
        );

        match backend.pattern {
            Pattern::RealTime => self
                .realtime
                .dispatch(request, &backend)
                .await
                .map(Submission::Ready),
            Pattern::Hybrid => self.hybrid.route(request, backend).await,
            Pattern::BulkOnly => {
                if urgent {
                    tracing::warn!(
                        request_id = %request.id,
                        backend = %backend.id,
                        "Urgent flag ignored for bulk-only backend"
                    );
                }
                Ok(Submission::Queued(self.accumulator.enqueue(request, backend)))
            }
        }
    }

    fn reject(&self, request: &mut InferenceRequest, pattern: Option<Pattern>, error: &GatewayError) {
        request.advance(RequestState::Failed);
        self.tracker.record(ResultRecord {
            request_id: request.id,
            backend_id: request.backend_id.clone(),
            pattern,
            mode: DispatchMode::Rejected,
            processing_time_ms: request.elapsed_ms(),
            outcome: Outcome::Failure,
            attempts: 0,
            batch_id: None,
            error: Some(error.to_string()),
        });
    }

    /// Replace the whole backend table. In-flight batches keep their descriptor.
    pub fn reload(&self, backends: &[BackendConfig]) -> Result<usize, RegistryError> {
        let descriptors = descriptors_from(backends)?;
        let count = descriptors.len();
        self.registry.swap_all(descriptors);
        Ok(count)
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    pub fn accumulator(&self) -> &Arc<BatchAccumulator> {
        &self.accumulator
    }

    pub fn tracker(&self) -> &ResultTracker {
        &self.tracker
    }
}

fn descriptors_from(backends: &[BackendConfig]) -> Result<Vec<BackendDescriptor>, RegistryError> {
    backends.iter().map(BackendDescriptor::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::BackendCallError;
    use crate::resilience::CircuitStatus;
    use crate::tracker::MemorySink;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        single: AtomicUsize,
        batch: AtomicUsize,
    }

    #[async_trait]
    impl ModelClient for Counting {
        async fn invoke(&self, _: &BackendDescriptor, payload: &Value) -> Result<Value, BackendCallError> {
            self.single.fetch_add(1, Ordering::SeqCst);
            Ok(payload.clone())
        }

        async fn invoke_batch(&self, _: &BackendDescriptor, payloads: &[Value]) -> Result<Vec<Value>, BackendCallError> {
            self.batch.fetch_add(1, Ordering::SeqCst);
            Ok(payloads.to_vec())
        }
    }

    fn backend(id: &str, pattern: Pattern) -> BackendDescriptor {
        BackendDescriptor {
            id: id.into(),
            endpoint: format!("http://{id}:8000").parse().unwrap(),
            pattern,
            timeout: Duration::from_secs(1),
            max_batch_size: 4,
            max_batch_wait: Duration::from_millis(50),
            auth_token: None,
        }
    }

    fn orchestrator() -> (PatternOrchestrator, Arc<Counting>, Arc<MemorySink>) {
        let client = Arc::new(Counting::default());
        let sink = Arc::new(MemorySink::new(32));
        let registry = BackendRegistry::from_descriptors([
            backend("phi3", Pattern::RealTime),
            backend("hermes", Pattern::Hybrid),
            backend("mixtral", Pattern::BulkOnly),
        ]);
        let orchestrator = PatternOrchestrator::new(
            Arc::new(registry),
            Arc::new(CircuitBreakers::new(BreakerSettings::default())),
            client.clone(),
            ResultTracker::spawn(32, sink.clone()),
            RetryPolicy::default(),
        );
        (orchestrator, client, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_never_pending() {
        let (orchestrator, client, _) = orchestrator();
        let submission = orchestrator.submit("phi3", json!("hi"), false).await.unwrap();
        assert!(!submission.is_pending());
        assert_eq!(client.single.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hybrid_branches_on_urgency() {
        let (orchestrator, client, _) = orchestrator();
        let urgent = orchestrator.submit("hermes", json!(1), true).await.unwrap();
        let deferred = orchestrator.submit("hermes", json!(2), false).await.unwrap();

        assert!(!urgent.is_pending());
        assert!(deferred.is_pending());
        assert_eq!(client.batch.load(Ordering::SeqCst), 0);

        let response = deferred.resolve().await.unwrap();
        assert_eq!(response.result, json!(2));
        assert!(response.batch_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_ignores_urgent() {
        let (orchestrator, client, _) = orchestrator();
        let submission = orchestrator.submit("mixtral", json!(1), true).await.unwrap();
        assert!(submission.is_pending());
        assert_eq!(client.single.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_backend_recorded() {
        let (orchestrator, client, sink) = orchestrator();
        let err = orchestrator.submit("ghost", json!(1), false).await.unwrap_err();
        assert_eq!(err, GatewayError::UnknownBackend("ghost".into()));
        assert_eq!(client.single.load(Ordering::SeqCst), 0);

        while sink.is_empty() {
            tokio::task::yield_now().await;
        }
        let record = &sink.records()[0];
        assert_eq!(record.mode, DispatchMode::Rejected);
        assert_eq!(record.pattern, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_rejects_without_call() {
        let (orchestrator, client, _) = orchestrator();
        for _ in 0..5 {
            orchestrator.breakers().record_failure("phi3");
        }

        let err = orchestrator.submit("phi3", json!(1), false).await.unwrap_err();
        assert_eq!(err, GatewayError::BackendUnavailable("phi3".into()));
        assert_eq!(client.single.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_swaps_patterns() {
        let (orchestrator, _, _) = orchestrator();
        let configs = vec![BackendConfig::from(&backend("phi3", Pattern::BulkOnly))];

        assert_eq!(orchestrator.reload(&configs).unwrap(), 1);
        let submission = orchestrator.submit("phi3", json!(1), false).await.unwrap();
        assert!(submission.is_pending());
        assert!(orchestrator.submit("hermes", json!(1), false).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_submit_leaves_probe_for_flush() {
        let (orchestrator, client, _) = orchestrator();
        for _ in 0..5 {
            orchestrator.breakers().record_failure("mixtral");
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        let submission = orchestrator.submit("mixtral", json!(1), false).await.unwrap();
        assert_eq!(orchestrator.breakers().get("mixtral").status(), CircuitStatus::Open);

        let response = submission.resolve().await.unwrap();
        assert_eq!(response.result, json!(1));
        assert_eq!(client.batch.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.breakers().get("mixtral").status(), CircuitStatus::Closed);
    }
}
