//! Inference gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http (axum) ──▶ PatternOrchestrator ──▶ registry lookup
//!                                       │                 circuit breaker
//!                 ┌─────────────────────┼───────────────────────┐
//!                 ▼                     ▼                       ▼
//!           RealTime               Hybrid                  BulkOnly
//!       RealTimeDispatcher    urgent? realtime        BatchAccumulator
//!                 │             : accumulator               │
//!                 └──────────────── ModelClient ────────────┘
//!                                       │
//!                                       ▼
//!                               model backends
//!
//!     every outcome ──▶ ResultTracker ──▶ metrics + recent records
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use pattern_gateway::config::{load_config, ConfigWatcher};
use pattern_gateway::http::HttpServer;
use pattern_gateway::lifecycle::{next_signal, SignalEvent, Shutdown};
use pattern_gateway::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "pattern-gateway", version, about = "Pattern-aware inference gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/gateway.toml")]
    config: PathBuf,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Reload the backend table when the config file changes.
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = load_config(&args.config)?;
    let mut config = file_config.clone();
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "pattern-gateway starting");
    tracing::info!(
        path = ?args.config,
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let (watcher, backend_updates) = ConfigWatcher::new(&args.config, &file_config);
    let reloader = watcher.reloader();
    // keep the notify handle alive for the life of the process
    let _watch_guard = if args.watch { Some(watcher.run()?) } else { None };

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)?;
    let server_shutdown = shutdown.subscribe();
    let server_task = tokio::spawn(server.run(listener, backend_updates, server_shutdown));

    loop {
        match next_signal().await? {
            SignalEvent::Shutdown => {
                shutdown.trigger();
                break;
            }
            SignalEvent::Reload => match reloader.reload() {
                Ok(sent) => tracing::info!(path = ?args.config, changed = sent, "SIGHUP, backend table reloaded"),
                Err(e) => tracing::error!(error = %e, "SIGHUP reload failed, keeping current backends"),
            },
        }
    }

    server_task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}
