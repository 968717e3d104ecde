//! Batch accumulator.
//!
//! Collects requests per backend and submits them as one call when the batch
//! is full or its wait window has elapsed, whichever comes first.
//!
//! # Batch Lifecycle
//! ```text
//! first member arrives → Accumulating (window timer armed)
//!     → full: submitted at once, timer disarmed
//!     → window elapsed: timer task submits what is there
//! Submitting → Completed | Failed
//! ```
//!
//! # Failure Handling
//! - One failed batch call is one breaker failure, not one per member
//! - Transient failures (timeout, transport) are resubmitted once if the
//!   breaker still allows the backend
//! - 413 splits the batch in half and submits both halves, once
//! - A reply with the wrong number of results fails the whole batch

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::dispatch::client::{BackendCallError, ModelClient};
use crate::error::GatewayError;
use crate::gateway::request::{InferenceRequest, InferenceResponse, RequestState};
use crate::observability::metrics;
use crate::registry::BackendDescriptor;
use crate::resilience::{Admission, CircuitBreaker, CircuitBreakers, CircuitStatus, RetryPolicy};
use crate::tracker::{DispatchMode, Outcome, ResultRecord, ResultTracker};

type Reply = oneshot::Sender<Result<InferenceResponse, GatewayError>>;

/// Batch lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Accumulating,
    Submitting,
    Completed,
    Failed,
}

/// What caused a batch to be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Window,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Window => "window",
        }
    }
}

#[derive(Debug)]
struct BatchMember {
    request: InferenceRequest,
    reply: Reply,
}

#[derive(Debug)]
struct Batch {
    id: Uuid,
    backend: Arc<BackendDescriptor>,
    members: Vec<BatchMember>,
    created_at: Instant,
    state: BatchState,
    timer: Option<AbortHandle>,
}

impl Batch {
    fn new(backend: Arc<BackendDescriptor>) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            members: Vec::new(),
            created_at: Instant::now(),
            state: BatchState::Accumulating,
            timer: None,
        }
    }

    fn is_full(&self) -> bool {
        self.members.len() >= self.backend.max_batch_size
    }

    /// Cancel the window timer. Never called from the timer task itself.
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn set_state(&mut self, next: BatchState) {
        tracing::trace!(batch_id = %self.id, from = ?self.state, to = ?next, "Batch state");
        self.state = next;
    }
}

/// Per-backend queue: at most one accumulating batch, behind its own lock.
#[derive(Debug)]
struct BackendQueue {
    backend_id: String,
    active: Mutex<Option<Batch>>,
}

impl BackendQueue {
    fn new(backend_id: &str) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            active: Mutex::new(None),
        }
    }

    fn depth(&self) -> usize {
        self.active.lock().as_ref().map(|b| b.members.len()).unwrap_or(0)
    }

    /// Take the active batch, but only if it is still the one with `batch_id`.
    fn take_if(&self, batch_id: Uuid) -> Option<Batch> {
        let mut active = self.active.lock();
        match &*active {
            Some(batch) if batch.id == batch_id => active.take(),
            _ => None,
        }
    }
}

enum BatchFailure {
    TooLarge,
    Call(GatewayError, u32),
}

/// Removes a queued request from its batch before submission.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    queue: Arc<BackendQueue>,
    batch_id: Uuid,
    request_id: Uuid,
    tracker: ResultTracker,
}

impl CancelHandle {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Returns `true` if the request was still waiting and is now removed.
    /// Siblings are unaffected; an emptied batch is discarded.
    pub fn cancel(&self) -> bool {
        let (mut member, pattern, depth) = {
            let mut active = self.queue.active.lock();
            let batch = match &mut *active {
                Some(batch) if batch.id == self.batch_id => batch,
                _ => return false,
            };
            let Some(position) = batch
                .members
                .iter()
                .position(|m| m.request.id == self.request_id)
            else {
                return false;
            };

            let member = batch.members.remove(position);
            let pattern = batch.backend.pattern;
            let depth = batch.members.len();
            if depth == 0 {
                if let Some(mut emptied) = active.take() {
                    emptied.disarm();
                }
            }
            (member, pattern, depth)
        };

        metrics::record_queue_depth(&self.queue.backend_id, depth);
        member.request.advance(RequestState::Failed);
        let error = GatewayError::Cancelled(self.request_id);
        self.tracker.record(ResultRecord {
            request_id: self.request_id,
            backend_id: self.queue.backend_id.clone(),
            pattern: Some(pattern),
            mode: DispatchMode::Batched,
            processing_time_ms: member.request.elapsed_ms(),
            outcome: Outcome::Failure,
            attempts: 0,
            batch_id: Some(self.batch_id),
            error: Some(error.to_string()),
        });
        tracing::debug!(
            request_id = %self.request_id,
            batch_id = %self.batch_id,
            remaining = depth,
            "Queued request cancelled"
        );
        let _ = member.reply.send(Err(error));
        true
    }
}

/// Handle to a queued request's eventual result.
///
/// Await it for the result, or cancel it while the batch is still accumulating.
/// Dropping it does not cancel the request.
pub struct PendingResult {
    request_id: Uuid,
    batch_id: Uuid,
    backend_id: String,
    rx: oneshot::Receiver<Result<InferenceResponse, GatewayError>>,
    cancel: CancelHandle,
}

impl PendingResult {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Detached cancel capability, usable after the future moved elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }
}

impl fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("request_id", &self.request_id)
            .field("batch_id", &self.batch_id)
            .field("backend_id", &self.backend_id)
            .finish()
    }
}

impl Future for PendingResult {
    type Output = Result<InferenceResponse, GatewayError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let request_id = self.request_id;
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(GatewayError::Internal(format!(
                    "batch for request {request_id} was dropped before completion"
                )))
            })
        })
    }
}

/// Per-backend batch accumulation and submission.
pub struct BatchAccumulator {
    queues: DashMap<String, Arc<BackendQueue>>,
    client: Arc<dyn ModelClient>,
    breakers: Arc<CircuitBreakers>,
    tracker: ResultTracker,
    retry: RetryPolicy,
}

impl BatchAccumulator {
    pub fn new(
        client: Arc<dyn ModelClient>,
        breakers: Arc<CircuitBreakers>,
        tracker: ResultTracker,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            queues: DashMap::new(),
            client,
            breakers,
            tracker,
            retry,
        }
    }

    fn queue_for(&self, backend_id: &str) -> Arc<BackendQueue> {
        if let Some(queue) = self.queues.get(backend_id) {
            return queue.clone();
        }
        self.queues
            .entry(backend_id.to_string())
            .or_insert_with(|| Arc::new(BackendQueue::new(backend_id)))
            .clone()
    }

    /// Requests waiting in the backend's accumulating batch.
    pub fn queue_depth(&self, backend_id: &str) -> usize {
        self.queues
            .get(backend_id)
            .map(|q| q.depth())
            .unwrap_or(0)
    }

    /// Depth of every queue seen so far, sorted by backend id.
    pub fn queue_depths(&self) -> Vec<(String, usize)> {
        let mut depths: Vec<_> = self
            .queues
            .iter()
            .map(|q| (q.key().clone(), q.depth()))
            .collect();
        depths.sort();
        depths
    }

    /// Add a request to the backend's current batch.
    pub fn enqueue(
        self: &Arc<Self>,
        mut request: InferenceRequest,
        backend: Arc<BackendDescriptor>,
    ) -> PendingResult {
        let queue = self.queue_for(&backend.id);
        let (reply, rx) = oneshot::channel();
        let request_id = request.id;
        request.advance(RequestState::Queued);

        let (batch_id, depth, full) = {
            let mut active = queue.active.lock();
            let batch = active.get_or_insert_with(|| Batch::new(backend.clone()));
            if batch.timer.is_none() {
                batch.timer = Some(self.arm_window(&queue, batch.id, batch.backend.max_batch_wait));
            }
            batch.members.push(BatchMember { request, reply });

            let batch_id = batch.id;
            let depth = batch.members.len();
            let full = if batch.is_full() { active.take() } else { None };
            (batch_id, depth, full)
        };

        tracing::debug!(
            request_id = %request_id,
            backend = %backend.id,
            batch_id = %batch_id,
            depth,
            "Request queued"
        );

        match full {
            Some(mut batch) => {
                metrics::record_queue_depth(&backend.id, 0);
                batch.disarm();
                let accumulator = Arc::clone(self);
                tokio::spawn(async move {
                    accumulator.submit(batch, FlushTrigger::Size).await;
                });
            }
            None => metrics::record_queue_depth(&backend.id, depth),
        }

        PendingResult {
            request_id,
            batch_id,
            backend_id: backend.id.clone(),
            rx,
            cancel: CancelHandle {
                queue,
                batch_id,
                request_id,
                tracker: self.tracker.clone(),
            },
        }
    }

    fn arm_window(
        self: &Arc<Self>,
        queue: &Arc<BackendQueue>,
        batch_id: Uuid,
        wait: Duration,
    ) -> AbortHandle {
        let accumulator = Arc::clone(self);
        let queue = Arc::clone(queue);
        let deadline = Instant::now() + wait;
        tokio::spawn(async move {
            time::sleep_until(deadline).await;
            if let Some(batch) = queue.take_if(batch_id) {
                metrics::record_queue_depth(&queue.backend_id, 0);
                accumulator.submit(batch, FlushTrigger::Window).await;
            }
        })
        .abort_handle()
    }

    async fn submit(&self, mut batch: Batch, trigger: FlushTrigger) {
        // dropping the handle leaves the (possibly current) timer task alone
        batch.timer.take();
        batch.set_state(BatchState::Submitting);

        let backend = Arc::clone(&batch.backend);
        let batch_id = batch.id;
        let mut members = std::mem::take(&mut batch.members);
        let payloads: Vec<Value> = members
            .iter_mut()
            .map(|m| {
                m.request.advance(RequestState::BatchSubmitted);
                std::mem::take(&mut m.request.payload)
            })
            .collect();

        metrics::record_batch_submitted(&backend.id, members.len(), trigger.as_str());
        tracing::info!(
            backend = %backend.id,
            batch_id = %batch_id,
            size = members.len(),
            trigger = trigger.as_str(),
            waited_ms = batch.created_at.elapsed().as_millis() as u64,
            "Submitting batch"
        );

        let breaker = self.breakers.get(&backend.id);
        let admission = breaker.try_acquire();
        if admission == Admission::Rejected {
            tracing::warn!(
                backend = %backend.id,
                batch_id = %batch_id,
                status = breaker.status().as_str(),
                "Circuit not admitting at flush, failing batch"
            );
            self.fail(&backend, batch_id, members, GatewayError::BackendUnavailable(backend.id.clone()), 0);
            batch.set_state(BatchState::Failed);
            return;
        }

        let succeeded = match self.call(&backend, &breaker, &payloads).await {
            Ok((results, attempts)) => {
                self.complete(&backend, batch_id, members, results, attempts);
                true
            }
            Err(BatchFailure::TooLarge) if members.len() > 1 => {
                let probe = admission == Admission::Probe;
                self.split_and_submit(&backend, &breaker, probe, batch_id, members, payloads).await
            }
            Err(BatchFailure::TooLarge) => {
                let error = GatewayError::BatchSplit {
                    backend: backend.id.clone(),
                    size: members.len(),
                };
                self.fail(&backend, batch_id, members, error, 1);
                false
            }
            Err(BatchFailure::Call(error, attempts)) => {
                self.fail(&backend, batch_id, members, error, attempts);
                false
            }
        };

        batch.set_state(if succeeded {
            BatchState::Completed
        } else {
            BatchState::Failed
        });
    }

    /// Submit both halves of a batch the backend rejected as too large.
    ///
    /// Halves run in parallel, except when the batch holds the Half-Open probe:
    /// then the second half goes out only after the first one closed the circuit
    /// or came back too large itself.
    async fn split_and_submit(
        &self,
        backend: &BackendDescriptor,
        breaker: &CircuitBreaker,
        probe: bool,
        batch_id: Uuid,
        mut first_members: Vec<BatchMember>,
        mut first_payloads: Vec<Value>,
    ) -> bool {
        let mid = first_members.len() / 2;
        let second_members = first_members.split_off(mid);
        let second_payloads = first_payloads.split_off(mid);

        tracing::warn!(
            backend = %backend.id,
            batch_id = %batch_id,
            first = first_members.len(),
            second = second_members.len(),
            "Backend rejected batch as too large, splitting"
        );

        let (first, second) = if probe {
            let first = self.call(backend, breaker, &first_payloads).await;
            let second = if breaker.status() == CircuitStatus::Open {
                Err(BatchFailure::Call(GatewayError::BackendUnavailable(backend.id.clone()), 0))
            } else {
                self.call(backend, breaker, &second_payloads).await
            };
            (first, second)
        } else {
            future::join(
                self.call(backend, breaker, &first_payloads),
                self.call(backend, breaker, &second_payloads),
            )
            .await
        };

        let first_ok = self.settle_half(backend, batch_id, first_members, first);
        let second_ok = self.settle_half(backend, batch_id, second_members, second);
        first_ok && second_ok
    }

    fn settle_half(
        &self,
        backend: &BackendDescriptor,
        batch_id: Uuid,
        members: Vec<BatchMember>,
        result: Result<(Vec<Value>, u32), BatchFailure>,
    ) -> bool {
        match result {
            Ok((results, attempts)) => {
                self.complete(backend, batch_id, members, results, attempts);
                true
            }
            Err(BatchFailure::TooLarge) => {
                let error = GatewayError::BatchSplit {
                    backend: backend.id.clone(),
                    size: members.len(),
                };
                self.fail(backend, batch_id, members, error, 2);
                false
            }
            Err(BatchFailure::Call(error, attempts)) => {
                self.fail(backend, batch_id, members, error, attempts);
                false
            }
        }
    }

    /// One batch call, resubmitted once on a transient failure.
    async fn call(
        &self,
        backend: &BackendDescriptor,
        breaker: &CircuitBreaker,
        payloads: &[Value],
    ) -> Result<(Vec<Value>, u32), BatchFailure> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = match time::timeout(backend.timeout, self.client.invoke_batch(backend, payloads)).await {
                Ok(result) => result,
                Err(_) => Err(BackendCallError::Timeout),
            };

            match outcome {
                Ok(results) if results.len() == payloads.len() => {
                    breaker.record_success();
                    return Ok((results, attempts));
                }
                Ok(results) => {
                    breaker.record_failure();
                    tracing::warn!(
                        backend = %backend.id,
                        expected = payloads.len(),
                        received = results.len(),
                        "Batch reply is not aligned with request, failing whole batch"
                    );
                    return Err(BatchFailure::Call(
                        GatewayError::BackendError {
                            backend: backend.id.clone(),
                            message: format!(
                                "backend returned {} results for {} payloads",
                                results.len(),
                                payloads.len()
                            ),
                        },
                        attempts,
                    ));
                }
                Err(BackendCallError::PayloadTooLarge) => return Err(BatchFailure::TooLarge),
                Err(error) => {
                    if error.counts_against_backend() {
                        breaker.record_failure();
                    } else {
                        breaker.record_success();
                    }

                    // the outcome above released any probe this call held
                    let resubmit = attempts == 1
                        && self.retry.resubmit_batches
                        && error.is_transient()
                        && breaker.allow();
                    if !resubmit {
                        tracing::warn!(backend = %backend.id, attempts, error = %error, "Batch call failed");
                        return Err(BatchFailure::Call(
                            error.into_gateway_error(&backend.id, attempts),
                            attempts,
                        ));
                    }

                    let delay = self.retry.delay(attempts);
                    tracing::warn!(
                        backend = %backend.id,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "Transient batch failure, resubmitting once"
                    );
                    time::sleep(delay).await;
                }
            }
        }
    }

    fn complete(
        &self,
        backend: &BackendDescriptor,
        batch_id: Uuid,
        members: Vec<BatchMember>,
        results: Vec<Value>,
        attempts: u32,
    ) {
        for (mut member, result) in members.into_iter().zip(results) {
            member.request.advance(RequestState::Succeeded);
            let processing_time_ms = member.request.elapsed_ms();
            self.tracker.record(ResultRecord {
                request_id: member.request.id,
                backend_id: backend.id.clone(),
                pattern: Some(backend.pattern),
                mode: DispatchMode::Batched,
                processing_time_ms,
                outcome: Outcome::from_attempts(attempts),
                attempts,
                batch_id: Some(batch_id),
                error: None,
            });
            let _ = member.reply.send(Ok(InferenceResponse {
                request_id: member.request.id,
                backend_id: backend.id.clone(),
                pattern: backend.pattern,
                result,
                batch_id: Some(batch_id),
                attempts,
                processing_time_ms,
            }));
        }
    }

    fn fail(
        &self,
        backend: &BackendDescriptor,
        batch_id: Uuid,
        members: Vec<BatchMember>,
        error: GatewayError,
        attempts: u32,
    ) {
        for mut member in members {
            member.request.advance(RequestState::Failed);
            self.tracker.record(ResultRecord {
                request_id: member.request.id,
                backend_id: backend.id.clone(),
                pattern: Some(backend.pattern),
                mode: DispatchMode::Batched,
                processing_time_ms: member.request.elapsed_ms(),
                outcome: Outcome::Failure,
                attempts,
                batch_id: Some(batch_id),
                error: Some(error.to_string()),
            });
            let _ = member.reply.send(Err(error.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Pattern;
    use crate::resilience::BreakerSettings;
    use crate::tracker::MemorySink;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes each payload back, or plays scripted failures first.
    #[derive(Default)]
    struct EchoClient {
        calls: AtomicUsize,
        sizes: Mutex<Vec<usize>>,
        script: Mutex<VecDeque<BackendCallError>>,
        max_accepted: Option<usize>,
    }

    #[async_trait]
    impl ModelClient for EchoClient {
        async fn invoke(&self, _: &BackendDescriptor, payload: &Value) -> Result<Value, BackendCallError> {
            Ok(payload.clone())
        }

        async fn invoke_batch(&self, _: &BackendDescriptor, payloads: &[Value]) -> Result<Vec<Value>, BackendCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sizes.lock().push(payloads.len());
            if let Some(error) = self.script.lock().pop_front() {
                return Err(error);
            }
            if self.max_accepted.is_some_and(|max| payloads.len() > max) {
                return Err(BackendCallError::PayloadTooLarge);
            }
            Ok(payloads.iter().map(|p| serde_json::json!({ "echo": p })).collect())
        }
    }

    fn backend(max_batch_size: usize, wait_ms: u64) -> Arc<BackendDescriptor> {
        Arc::new(BackendDescriptor {
            id: "mixtral".into(),
            endpoint: "http://gpu-03:8000".parse().unwrap(),
            pattern: Pattern::BulkOnly,
            timeout: Duration::from_secs(5),
            max_batch_size,
            max_batch_wait: Duration::from_millis(wait_ms),
            auth_token: None,
        })
    }

    fn accumulator(client: Arc<EchoClient>) -> (Arc<BatchAccumulator>, Arc<MemorySink>, Arc<CircuitBreakers>) {
        let sink = Arc::new(MemorySink::new(64));
        let breakers = Arc::new(CircuitBreakers::new(BreakerSettings::default()));
        let accumulator = Arc::new(BatchAccumulator::new(
            client,
            breakers.clone(),
            ResultTracker::spawn(64, sink.clone()),
            RetryPolicy::default(),
        ));
        (accumulator, sink, breakers)
    }

    fn request(n: i64) -> InferenceRequest {
        let mut request = InferenceRequest::new("mixtral", serde_json::json!(n), false);
        request.advance(RequestState::Dispatching);
        request
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_size_preserves_order() {
        let client = Arc::new(EchoClient::default());
        let (acc, _, _) = accumulator(client.clone());
        let backend = backend(3, 10_000);

        let pending: Vec<_> = (0..3).map(|n| acc.enqueue(request(n), backend.clone())).collect();
        let batch_id = pending[0].batch_id();
        assert!(pending.iter().all(|p| p.batch_id() == batch_id));

        for (n, p) in pending.into_iter().enumerate() {
            let response = p.await.unwrap();
            assert_eq!(response.result, serde_json::json!({ "echo": n }));
            assert_eq!(response.batch_id, Some(batch_id));
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(acc.queue_depth("mixtral"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_window() {
        let client = Arc::new(EchoClient::default());
        let (acc, _, _) = accumulator(client.clone());
        let backend = backend(8, 200);

        let start = Instant::now();
        let first = acc.enqueue(request(1), backend.clone());
        time::advance(Duration::from_millis(150)).await;
        let second = acc.enqueue(request(2), backend.clone());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(acc.queue_depth("mixtral"), 2);

        let (a, b) = tokio::join!(first, second);
        assert!(a.is_ok() && b.is_ok());
        // the window runs from the oldest member, not the newest
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(250));
        assert_eq!(*client.sizes.lock(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_submission() {
        let client = Arc::new(EchoClient::default());
        let (acc, sink, _) = accumulator(client.clone());
        let backend = backend(8, 100);

        let keep = acc.enqueue(request(1), backend.clone());
        let drop_me = acc.enqueue(request(2), backend.clone());
        let handle = drop_me.cancel_handle();

        assert!(handle.cancel());
        assert!(!handle.cancel(), "second cancel is a no-op");
        assert_eq!(drop_me.await, Err(GatewayError::Cancelled(handle.request_id())));

        let response = keep.await.unwrap();
        assert_eq!(response.result, serde_json::json!({ "echo": 1 }));
        assert_eq!(*client.sizes.lock(), vec![1]);

        while sink.len() < 2 {
            tokio::task::yield_now().await;
        }
        let records = sink.records();
        assert_eq!(records.iter().filter(|r| r.outcome == Outcome::Failure).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_submission_has_no_effect() {
        let client = Arc::new(EchoClient::default());
        let (acc, _, _) = accumulator(client.clone());
        let backend = backend(1, 100);

        let pending = acc.enqueue(request(7), backend);
        assert!(!pending.cancel());
        assert!(pending.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelling_last_member_discards_batch() {
        let client = Arc::new(EchoClient::default());
        let (acc, _, _) = accumulator(client.clone());
        let backend = backend(8, 100);

        let only = acc.enqueue(request(1), backend.clone());
        assert!(only.cancel());
        assert_eq!(acc.queue_depth("mixtral"), 0);

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_on_too_large() {
        let client = Arc::new(EchoClient {
            max_accepted: Some(2),
            ..Default::default()
        });
        let (acc, _, breakers) = accumulator(client.clone());
        let backend = backend(4, 100);

        let pending: Vec<_> = (0..4).map(|n| acc.enqueue(request(n), backend.clone())).collect();
        for (n, p) in pending.into_iter().enumerate() {
            assert_eq!(p.await.unwrap().result, serde_json::json!({ "echo": n }));
        }
        assert_eq!(*client.sizes.lock(), vec![4, 2, 2]);
        assert_eq!(breakers.get("mixtral").status(), CircuitStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_batch_splits_in_sequence() {
        let client = Arc::new(EchoClient::default());
        {
            let mut script = client.script.lock();
            script.push_back(BackendCallError::PayloadTooLarge);
            script.push_back(BackendCallError::Status {
                status: 500,
                body: String::new(),
            });
        }
        let (acc, _, breakers) = accumulator(client.clone());
        for _ in 0..5 {
            breakers.record_failure("mixtral");
        }
        time::advance(Duration::from_secs(30)).await;
        let backend = backend(4, 100);

        let pending: Vec<_> = (0..4).map(|n| acc.enqueue(request(n), backend.clone())).collect();
        let results: Vec<_> = futures_util::future::join_all(pending).await;

        // the failed first half reopened the circuit, so the second half never went out
        assert_eq!(*client.sizes.lock(), vec![4, 2]);
        assert!(matches!(results[0], Err(GatewayError::BackendError { .. })));
        assert_eq!(results[3], Err(GatewayError::BackendUnavailable("mixtral".into())));
        assert_eq!(breakers.get("mixtral").status(), CircuitStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_split_only_once() {
        let client = Arc::new(EchoClient {
            max_accepted: Some(1),
            ..Default::default()
        });
        let (acc, _, _) = accumulator(client.clone());
        let backend = backend(4, 100);

        let pending: Vec<_> = (0..4).map(|n| acc.enqueue(request(n), backend.clone())).collect();
        for p in pending {
            assert_eq!(
                p.await,
                Err(GatewayError::BatchSplit {
                    backend: "mixtral".into(),
                    size: 2
                })
            );
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_resubmitted_once() {
        let client = Arc::new(EchoClient::default());
        client.script.lock().push_back(BackendCallError::Transport("reset".into()));
        let (acc, sink, breakers) = accumulator(client.clone());
        let backend = backend(2, 100);

        let a = acc.enqueue(request(1), backend.clone());
        let b = acc.enqueue(request(2), backend.clone());
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap().attempts, 2);
        assert_eq!(b.unwrap().attempts, 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        // one failure event for the batch, then reset by the success
        assert_eq!(breakers.get("mixtral").snapshot().consecutive_failures, 0);

        while sink.len() < 2 {
            tokio::task::yield_now().await;
        }
        assert!(sink.records().iter().all(|r| r.outcome == Outcome::Retried));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_failure_fails_all_members_once() {
        let client = Arc::new(EchoClient::default());
        client.script.lock().push_back(BackendCallError::Status {
            status: 500,
            body: "oom".into(),
        });
        let (acc, _, breakers) = accumulator(client.clone());
        let backend = backend(3, 100);

        let pending: Vec<_> = (0..3).map(|n| acc.enqueue(request(n), backend.clone())).collect();
        for p in pending {
            assert!(matches!(p.await, Err(GatewayError::BackendError { .. })));
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(breakers.get("mixtral").snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_misaligned_reply_fails_whole_batch() {
        struct ShortClient;

        #[async_trait]
        impl ModelClient for ShortClient {
            async fn invoke(&self, _: &BackendDescriptor, p: &Value) -> Result<Value, BackendCallError> {
                Ok(p.clone())
            }
            async fn invoke_batch(&self, _: &BackendDescriptor, p: &[Value]) -> Result<Vec<Value>, BackendCallError> {
                Ok(p.iter().skip(1).cloned().collect())
            }
        }

        let breakers = Arc::new(CircuitBreakers::new(BreakerSettings::default()));
        let acc = Arc::new(BatchAccumulator::new(
            Arc::new(ShortClient),
            breakers,
            ResultTracker::spawn(8, Arc::new(MemorySink::new(8))),
            RetryPolicy::default(),
        ));
        let backend = backend(2, 100);

        let a = acc.enqueue(request(1), backend.clone());
        let b = acc.enqueue(request(2), backend);
        assert!(matches!(a.await, Err(GatewayError::BackendError { .. })));
        assert!(matches!(b.await, Err(GatewayError::BackendError { .. })));
    }
}
