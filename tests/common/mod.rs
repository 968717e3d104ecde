//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{http::StatusCode, Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;

use pattern_gateway::config::{BackendConfig, GatewayConfig};
use pattern_gateway::dispatch::{BackendCallError, ModelClient};
use pattern_gateway::http::HttpServer;
use pattern_gateway::lifecycle::Shutdown;
use pattern_gateway::registry::{BackendDescriptor, Pattern};

/// One observed backend call.
#[derive(Debug, Clone)]
pub struct Call {
    pub backend: String,
    /// 1 for single calls, member count for batch calls.
    pub size: usize,
    pub batched: bool,
    pub at: Instant,
}

/// In-process model client with scripted failures and a fixed latency.
///
/// Answers `{"backend": id, "echo": payload}` unless a failure is queued
/// for the backend.
#[derive(Default)]
pub struct ScriptedClient {
    latency: Duration,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<String, VecDeque<BackendCallError>>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Default::default()
        })
    }

    pub fn fail_next(&self, backend: &str, error: BackendCallError, times: usize) {
        let mut failures = self.failures.lock();
        let queue = failures.entry(backend.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, backend: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.backend == backend).collect()
    }

    fn observe(&self, backend: &str, size: usize, batched: bool) -> Option<BackendCallError> {
        self.calls.lock().push(Call {
            backend: backend.to_string(),
            size,
            batched,
            at: Instant::now(),
        });
        self.failures
            .lock()
            .get_mut(backend)
            .and_then(|queue| queue.pop_front())
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn invoke(&self, backend: &BackendDescriptor, payload: &Value) -> Result<Value, BackendCallError> {
        let failure = self.observe(&backend.id, 1, false);
        tokio::time::sleep(self.latency).await;
        match failure {
            Some(error) => Err(error),
            None => Ok(json!({ "backend": backend.id, "echo": payload })),
        }
    }

    async fn invoke_batch(
        &self,
        backend: &BackendDescriptor,
        payloads: &[Value],
    ) -> Result<Vec<Value>, BackendCallError> {
        let failure = self.observe(&backend.id, payloads.len(), true);
        tokio::time::sleep(self.latency).await;
        match failure {
            Some(error) => Err(error),
            None => Ok(payloads
                .iter()
                .map(|p| json!({ "backend": backend.id, "echo": p }))
                .collect()),
        }
    }
}

pub fn backend_config(id: &str, endpoint: &str, pattern: Pattern) -> BackendConfig {
    BackendConfig {
        id: id.to_string(),
        endpoint: endpoint.to_string(),
        pattern,
        timeout_ms: 2_000,
        max_batch_size: 4,
        max_batch_wait_ms: 50,
        auth_token: None,
    }
}

/// Test configuration: loopback bind, no metrics exporter, fast retries.
pub fn gateway_config(backends: Vec<BackendConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.listener.request_timeout_secs = 10;
    config.observability.metrics_enabled = false;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config.backends = backends;
    config
}

/// Start a mock model backend on an ephemeral port.
///
/// `respond` maps the request body to a status and JSON body.
pub async fn start_mock_backend<F>(respond: F) -> String
where
    F: Fn(Value) -> (u16, Value) + Send + Sync + 'static,
{
    let respond = Arc::new(respond);
    let app = Router::new().fallback(move |Json(body): Json<Value>| {
        let respond = respond.clone();
        async move {
            let (status, body) = respond(body);
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(body))
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1/generate")
}

/// Echo backend: a single payload comes back wrapped, an array comes back
/// element-wise wrapped.
pub fn echo(body: Value) -> (u16, Value) {
    match body {
        Value::Array(items) => (200, Value::Array(items.into_iter().map(|i| json!({ "echo": i })).collect())),
        other => (200, json!({ "echo": other })),
    }
}

/// A running gateway. Shuts down when dropped.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub reload: mpsc::UnboundedSender<Vec<BackendConfig>>,
    shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config).unwrap();

    let (reload, updates) = mpsc::unbounded_channel();
    let shutdown = Shutdown::new();
    tokio::spawn(server.run(listener, updates, shutdown.subscribe()));

    TestGateway {
        addr,
        reload,
        shutdown,
    }
}

/// Poll `GET /v1/requests/{id}` until it stops answering 202.
pub async fn poll_until_done(client: &reqwest::Client, gateway: &TestGateway, request_id: &str) -> reqwest::Response {
    for _ in 0..200 {
        let res = client
            .get(gateway.url(&format!("/v1/requests/{request_id}")))
            .send()
            .await
            .unwrap();
        if res.status() != reqwest::StatusCode::ACCEPTED {
            return res;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("request {request_id} never finished");
}
