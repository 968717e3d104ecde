//! Backend table hot reload.
//!
//! Only `[[backends]]` is applied to a running gateway. A reload re-reads the
//! whole file so it is validated as a unit, warns about edits to any other
//! section, and pushes the backend list only when it actually changed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::{BackendConfig, GatewayConfig};

/// Receiving end of backend table updates, consumed by the server.
pub type BackendUpdates = mpsc::UnboundedReceiver<Vec<BackendConfig>>;

/// Sections of `next` that differ from `running` and need a restart to apply.
pub fn restart_only_changes(running: &GatewayConfig, next: &GatewayConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if running.listener != next.listener {
        changed.push("listener");
    }
    if running.circuit_breaker != next.circuit_breaker {
        changed.push("circuit_breaker");
    }
    if running.retries != next.retries {
        changed.push("retries");
    }
    if running.tracker != next.tracker {
        changed.push("tracker");
    }
    if running.results != next.results {
        changed.push("results");
    }
    if running.observability != next.observability {
        changed.push("observability");
    }
    changed
}

/// Re-reads the config file and forwards changed backend tables.
///
/// Cheap to clone; the file watcher and the SIGHUP handler share one.
#[derive(Clone)]
pub struct BackendReloader {
    path: PathBuf,
    running: Arc<GatewayConfig>,
    applied: Arc<Mutex<Vec<BackendConfig>>>,
    tx: mpsc::UnboundedSender<Vec<BackendConfig>>,
}

impl BackendReloader {
    /// Load the file and push its backends if they differ from the last table sent.
    ///
    /// Returns whether an update went out. Invalid files leave the table alone.
    pub fn reload(&self) -> Result<bool, ConfigError> {
        let next = load_config(&self.path)?;

        let ignored = restart_only_changes(&self.running, &next);
        if !ignored.is_empty() {
            tracing::warn!(
                path = ?self.path,
                sections = ?ignored,
                "Config sections changed that only apply on restart, ignoring them"
            );
        }

        let mut applied = self.applied.lock();
        if *applied == next.backends {
            tracing::debug!(path = ?self.path, "Backend table unchanged");
            return Ok(false);
        }
        *applied = next.backends.clone();
        let _ = self.tx.send(next.backends);
        Ok(true)
    }
}

/// Watches the configuration file and reloads the backend table on change.
pub struct ConfigWatcher {
    path: PathBuf,
    reloader: BackendReloader,
}

impl ConfigWatcher {
    /// Create a watcher for `path`, with `running` as the configuration in effect.
    ///
    /// Returns the watcher and the receiver for backend table updates.
    pub fn new(path: &Path, running: &GatewayConfig) -> (Self, BackendUpdates) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reloader = BackendReloader {
            path: path.to_path_buf(),
            running: Arc::new(running.clone()),
            applied: Arc::new(Mutex::new(running.backends.clone())),
            tx,
        };

        (
            Self {
                path: path.to_path_buf(),
                reloader,
            },
            rx,
        )
    }

    /// Handle for reloads triggered elsewhere (SIGHUP).
    pub fn reloader(&self) -> BackendReloader {
        self.reloader.clone()
    }

    /// Start watching the file in a background thread.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let reloader = self.reloader.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match reloader.reload() {
                        Ok(true) => tracing::info!(path = ?reloader.path, "Config file changed, backend table sent"),
                        Ok(false) => {}
                        Err(e) => tracing::error!(error = %e, "Failed to reload config, keeping current backends"),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
