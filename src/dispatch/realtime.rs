//! Real-time dispatcher: one request, one backend call, bounded retries.

use std::sync::Arc;

use tokio::time;

use crate::dispatch::client::{BackendCallError, ModelClient};
use crate::error::GatewayError;
use crate::gateway::request::{InferenceRequest, InferenceResponse, RequestState};
use crate::registry::BackendDescriptor;
use crate::resilience::{CircuitBreakers, RetryPolicy};
use crate::tracker::{DispatchMode, Outcome, ResultRecord, ResultTracker};

/// Sends requests straight to their backend and waits for the answer.
pub struct RealTimeDispatcher {
    client: Arc<dyn ModelClient>,
    breakers: Arc<CircuitBreakers>,
    tracker: ResultTracker,
    policy: RetryPolicy,
}

impl RealTimeDispatcher {
    pub fn new(
        client: Arc<dyn ModelClient>,
        breakers: Arc<CircuitBreakers>,
        tracker: ResultTracker,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            breakers,
            tracker,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Dispatch `request` and wait for the result.
    ///
    /// Each attempt is bounded by the backend's timeout. Every attempt's
    /// outcome is reported to the backend's breaker; a retry is abandoned
    /// as soon as the breaker stops admitting calls.
    pub async fn dispatch(
        &self,
        mut request: InferenceRequest,
        backend: &BackendDescriptor,
    ) -> Result<InferenceResponse, GatewayError> {
        let breaker = self.breakers.get(&backend.id);
        let mut attempts = 0;

        let outcome = loop {
            attempts += 1;
            let result = match time::timeout(backend.timeout, self.client.invoke(backend, &request.payload)).await {
                Ok(result) => result,
                Err(_) => Err(BackendCallError::Timeout),
            };

            let error = match result {
                Ok(value) => {
                    breaker.record_success();
                    break Ok(value);
                }
                Err(error) => error,
            };

            if error.counts_against_backend() {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }

            if attempts > self.policy.max_retries || !self.policy.is_retryable(&error) {
                break Err(error);
            }
            if !breaker.allow() {
                tracing::warn!(
                    request_id = %request.id,
                    backend = %backend.id,
                    attempts,
                    "Circuit opened mid-retry, giving up"
                );
                break Err(error);
            }

            let delay = self.policy.delay(attempts);
            tracing::debug!(
                request_id = %request.id,
                backend = %backend.id,
                attempt = attempts,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Retrying backend call"
            );
            time::sleep(delay).await;
        };

        let processing_time_ms = request.elapsed_ms();
        match outcome {
            Ok(result) => {
                request.advance(RequestState::Succeeded);
                self.tracker.record(ResultRecord {
                    request_id: request.id,
                    backend_id: backend.id.clone(),
                    pattern: Some(backend.pattern),
                    mode: DispatchMode::Immediate,
                    processing_time_ms,
                    outcome: Outcome::from_attempts(attempts),
                    attempts,
                    batch_id: None,
                    error: None,
                });
                Ok(InferenceResponse {
                    request_id: request.id,
                    backend_id: backend.id.clone(),
                    pattern: backend.pattern,
                    result,
                    batch_id: None,
                    attempts,
                    processing_time_ms,
                })
            }
            Err(error) => {
                request.advance(RequestState::Failed);
                let error = error.into_gateway_error(&backend.id, attempts);
                tracing::warn!(
                    request_id = %request.id,
                    backend = %backend.id,
                    attempts,
                    error = %error,
                    "Real-time dispatch failed"
                );
                self.tracker.record(ResultRecord {
                    request_id: request.id,
                    backend_id: backend.id.clone(),
                    pattern: Some(backend.pattern),
                    mode: DispatchMode::Immediate,
                    processing_time_ms,
                    outcome: Outcome::Failure,
                    attempts,
                    batch_id: None,
                    error: Some(error.to_string()),
                });
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Pattern;
    use crate::resilience::{BreakerSettings, CircuitStatus};
    use crate::tracker::MemorySink;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Plays back scripted results, then succeeds.
    #[derive(Default)]
    struct Scripted {
        calls: AtomicU32,
        script: Mutex<VecDeque<Result<Value, BackendCallError>>>,
        hang: bool,
    }

    impl Scripted {
        fn with(script: Vec<Result<Value, BackendCallError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ModelClient for Scripted {
        async fn invoke(&self, _: &BackendDescriptor, payload: &Value) -> Result<Value, BackendCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({ "text": payload })))
        }

        async fn invoke_batch(&self, _: &BackendDescriptor, _: &[Value]) -> Result<Vec<Value>, BackendCallError> {
            unreachable!("real-time dispatch never batches")
        }
    }

    fn backend() -> BackendDescriptor {
        BackendDescriptor {
            id: "phi3".into(),
            endpoint: "http://gpu-01:8000".parse().unwrap(),
            pattern: Pattern::RealTime,
            timeout: Duration::from_secs(2),
            max_batch_size: 1,
            max_batch_wait: Duration::from_millis(10),
            auth_token: None,
        }
    }

    fn dispatcher(client: Arc<Scripted>, threshold: u32) -> (RealTimeDispatcher, Arc<CircuitBreakers>, Arc<MemorySink>) {
        let breakers = Arc::new(CircuitBreakers::new(BreakerSettings {
            failure_threshold: threshold,
            ..Default::default()
        }));
        let sink = Arc::new(MemorySink::new(16));
        let dispatcher = RealTimeDispatcher::new(
            client,
            breakers.clone(),
            ResultTracker::spawn(16, sink.clone()),
            RetryPolicy::default(),
        );
        (dispatcher, breakers, sink)
    }

    fn request() -> InferenceRequest {
        let mut request = InferenceRequest::new("phi3", json!("hello"), true);
        request.advance(RequestState::Dispatching);
        request
    }

    async fn drain(sink: &MemorySink, n: usize) -> Vec<ResultRecord> {
        while sink.len() < n {
            tokio::task::yield_now().await;
        }
        sink.records()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let client = Scripted::with(vec![]);
        let (dispatcher, _, sink) = dispatcher(client.clone(), 5);

        let response = dispatcher.dispatch(request(), &backend()).await.unwrap();
        assert_eq!(response.attempts, 1);
        assert_eq!(response.result, json!({ "text": "hello" }));
        assert!(response.batch_id.is_none());

        let records = drain(&sink, 1).await;
        assert_eq!(records[0].mode, DispatchMode::Immediate);
        assert_eq!(records[0].outcome, Outcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried() {
        let client = Scripted::with(vec![Err(BackendCallError::Transport("reset".into()))]);
        let (dispatcher, breakers, sink) = dispatcher(client.clone(), 5);

        let response = dispatcher.dispatch(request(), &backend()).await.unwrap();
        assert_eq!(response.attempts, 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(breakers.get("phi3").snapshot().consecutive_failures, 0);

        let records = drain(&sink, 1).await;
        assert_eq!(records[0].outcome, Outcome::Retried);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_not_retried() {
        let client = Scripted::with(vec![Err(BackendCallError::Status {
            status: 422,
            body: "bad prompt".into(),
        })]);
        let (dispatcher, breakers, _) = dispatcher(client.clone(), 5);

        let err = dispatcher.dispatch(request(), &backend()).await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendError { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(breakers.get("phi3").status(), CircuitStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_exhausts_retries() {
        let client = Arc::new(Scripted {
            hang: true,
            ..Default::default()
        });
        let (dispatcher, breakers, sink) = dispatcher(client.clone(), 10);

        let err = dispatcher.dispatch(request(), &backend()).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Timeout {
                backend: "phi3".into(),
                attempts: 3
            }
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(breakers.get("phi3").snapshot().consecutive_failures, 3);

        let records = drain(&sink, 1).await;
        assert_eq!(records[0].outcome, Outcome::Failure);
        assert_eq!(records[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_abandoned_when_circuit_opens() {
        let client = Scripted::with(vec![
            Err(BackendCallError::Status { status: 503, body: String::new() }),
            Err(BackendCallError::Status { status: 503, body: String::new() }),
        ]);
        let (dispatcher, breakers, _) = dispatcher(client.clone(), 1);

        let err = dispatcher.dispatch(request(), &backend()).await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendError { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(breakers.get("phi3").status(), CircuitStatus::Open);
    }
}
