//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with inference and admin handlers
//! - Wire up middleware (request id, tracing, timeout, body limit, metrics)
//! - Apply backend table reloads while serving
//! - Run the result sweeper
//! - Serve until the shutdown broadcast fires

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Request},
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::{BackendUpdates, GatewayConfig};
use crate::dispatch::{HttpModelClient, ModelClient};
use crate::gateway::PatternOrchestrator;
use crate::http::handlers;
use crate::http::results::ResultStore;
use crate::observability::metrics;
use crate::registry::RegistryError;
use crate::tracker::{FanoutSink, MemorySink, MetricsSink, ResultTracker};

/// Records kept in memory for the admin status view.
const RECENT_RECORDS: usize = 256;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PatternOrchestrator>,
    pub results: Arc<ResultStore>,
    pub recent: Arc<MemorySink>,
}

/// HTTP front end of the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    state: AppState,
}

impl HttpServer {
    /// Build a server that reaches backends over HTTP.
    ///
    /// Must be called inside a Tokio runtime (the result tracker spawns its worker).
    pub fn new(config: GatewayConfig) -> Result<Self, RegistryError> {
        Self::with_client(config, Arc::new(HttpModelClient::new()))
    }

    /// Build a server over any backend transport.
    pub fn with_client(config: GatewayConfig, client: Arc<dyn ModelClient>) -> Result<Self, RegistryError> {
        let recent = Arc::new(MemorySink::new(RECENT_RECORDS));
        let sink = FanoutSink::new(vec![Arc::new(MetricsSink), recent.clone()]);
        let tracker = ResultTracker::spawn(config.tracker.capacity, Arc::new(sink));

        let orchestrator = Arc::new(PatternOrchestrator::from_config(&config, client, tracker)?);
        let state = AppState {
            orchestrator,
            results: Arc::new(ResultStore::new()),
            recent,
        };

        let router = Self::build_router(&config, state.clone());
        Ok(Self {
            router,
            config,
            state,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let max_body = config.listener.max_body_bytes;

        Router::new()
            .route("/v1/infer", post(handlers::infer))
            .route("/v1/requests/{id}", get(handlers::poll).delete(handlers::cancel))
            .route("/health", get(handlers::health))
            .merge(admin::router())
            .route_layer(middleware::from_fn(track_requests))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(SetResponseHeaderLayer::if_not_present(
                        header::SERVER,
                        HeaderValue::from_static("pattern-gateway"),
                    ))
                    .layer(RequestBodyLimitLayer::new(max_body))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.listener.request_timeout_secs)))
                    .layer(DefaultBodyLimit::max(max_body)),
            )
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Backend tables arriving on `backend_updates` replace the registry.
    /// Returns once `shutdown` fires and in-flight requests have drained.
    pub async fn run(
        self,
        listener: TcpListener,
        mut backend_updates: BackendUpdates,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.state.orchestrator.registry().len(),
            "HTTP server starting"
        );

        let orchestrator = self.state.orchestrator.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = backend_updates.recv() => match update {
                        Some(backends) => match orchestrator.reload(&backends) {
                            Ok(count) => tracing::info!(backends = count, "Backend table reloaded"),
                            Err(e) => tracing::error!(error = %e, "Rejected backend table, keeping current"),
                        },
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let results = &self.config.results;
        tokio::spawn(self.state.results.clone().run_sweeper(
            Duration::from_secs(results.sweep_interval_secs.max(1)),
            Duration::from_secs(results.ttl_secs),
            shutdown.resubscribe(),
        ));

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}

async fn track_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = route_label(request.extensions().get::<MatchedPath>().map(|p| p.as_str()));
    let response = next.run(request).await;
    metrics::record_request(route, response.status().as_u16(), start);
    response
}

fn route_label(path: Option<&str>) -> &'static str {
    match path {
        Some("/v1/infer") => "infer",
        Some("/v1/requests/{id}") => "requests",
        Some("/health") => "health",
        Some(p) if p.starts_with("/admin") => "admin",
        _ => "unmatched",
    }
}
