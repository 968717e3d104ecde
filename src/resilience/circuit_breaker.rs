//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold within the failure window
//! Open → Half-Open: after cooldown
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open (prevents hammering recovering backend)
//! - Queued work checks with `admits_queued` and claims the probe only at flush
//! - 4xx responses never reach `record_failure`; the dispatcher reports them as
//!   successes since the backend answered

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half_open",
        }
    }
}

/// Result of asking a breaker for a call slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed circuit, no limit on concurrent calls.
    Granted,
    /// The caller holds the single Half-Open trial.
    Probe,
    Rejected,
}

/// Breaker thresholds.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub failure_window: Duration,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_millis(config.cooldown_ms),
            failure_window: Duration::from_millis(config.failure_window_ms),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    /// Set while the single Half-Open probe is outstanding.
    probe_started_at: Option<Instant>,
}

/// Point-in-time view of a breaker, for admin and tests.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub backend: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    /// Milliseconds since the circuit last opened, if it is not closed.
    pub open_for_ms: Option<u64>,
}

/// Failure gate for one backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    backend: String,
    settings: BreakerSettings,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(backend: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            backend: backend.into(),
            settings,
            state: Mutex::new(CircuitState {
                status: CircuitStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_failure_at: None,
                probe_started_at: None,
            }),
        }
    }

    /// Whether a request may be sent now. Claims the probe slot like `try_acquire`.
    pub fn allow(&self) -> bool {
        self.try_acquire() != Admission::Rejected
    }

    /// Admit one call, claiming the Half-Open probe slot if that is what it takes.
    ///
    /// In Open state this performs the Open → Half-Open transition once the
    /// cooldown has elapsed. Whoever receives `Admission::Probe` owns the single
    /// trial until it reports an outcome or the lease runs out after one cooldown.
    pub fn try_acquire(&self) -> Admission {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.status {
            CircuitStatus::Closed => Admission::Granted,
            CircuitStatus::Open => {
                if !self.cooled(&state, now) {
                    return Admission::Rejected;
                }
                self.transition(&mut state, CircuitStatus::HalfOpen);
                state.probe_started_at = Some(now);
                Admission::Probe
            }
            CircuitStatus::HalfOpen => {
                if self.probe_free(&state, now) {
                    state.probe_started_at = Some(now);
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// Whether a deferred call could be admitted later, without claiming anything.
    ///
    /// Used for requests that are queued now and sent at flush time, where the
    /// flush itself claims the probe slot.
    pub fn admits_queued(&self) -> bool {
        let now = Instant::now();
        let state = self.state.lock();
        match state.status {
            CircuitStatus::Closed => true,
            CircuitStatus::Open => self.cooled(&state, now),
            CircuitStatus::HalfOpen => self.probe_free(&state, now),
        }
    }

    /// Open and still cooling down. Does not consume the probe slot.
    pub fn is_rejecting(&self) -> bool {
        let state = self.state.lock();
        state.status == CircuitStatus::Open && !self.cooled(&state, Instant::now())
    }

    fn cooled(&self, state: &CircuitState, now: Instant) -> bool {
        state
            .opened_at
            .map(|opened| now.duration_since(opened) >= self.settings.cooldown)
            .unwrap_or(true)
    }

    // A probe whose outcome never came back releases its slot after one cooldown.
    fn probe_free(&self, state: &CircuitState, now: Instant) -> bool {
        state
            .probe_started_at
            .map(|started| now.duration_since(started) >= self.settings.cooldown)
            .unwrap_or(true)
    }

    /// Report a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match state.status {
            CircuitStatus::Closed => {
                state.consecutive_failures = 0;
                state.last_failure_at = None;
            }
            CircuitStatus::HalfOpen => {
                state.consecutive_failures = 0;
                state.last_failure_at = None;
                state.opened_at = None;
                state.probe_started_at = None;
                self.transition(&mut state, CircuitStatus::Closed);
            }
            // late result from a call admitted before the circuit opened
            CircuitStatus::Open => {}
        }
    }

    /// Report a failed call.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.status {
            CircuitStatus::Closed => {
                let within_window = state
                    .last_failure_at
                    .map(|last| now.duration_since(last) <= self.settings.failure_window)
                    .unwrap_or(false);
                state.consecutive_failures = if within_window {
                    state.consecutive_failures + 1
                } else {
                    1
                };
                state.last_failure_at = Some(now);

                if state.consecutive_failures >= self.settings.failure_threshold {
                    state.opened_at = Some(now);
                    self.transition(&mut state, CircuitStatus::Open);
                }
            }
            CircuitStatus::HalfOpen => {
                state.opened_at = Some(now);
                state.probe_started_at = None;
                state.last_failure_at = Some(now);
                self.transition(&mut state, CircuitStatus::Open);
            }
            CircuitStatus::Open => {}
        }
    }

    pub fn status(&self) -> CircuitStatus {
        self.state.lock().status
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock();
        CircuitSnapshot {
            backend: self.backend.clone(),
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            open_for_ms: state
                .opened_at
                .map(|opened| opened.elapsed().as_millis() as u64),
        }
    }

    fn transition(&self, state: &mut CircuitState, to: CircuitStatus) {
        let from = state.status;
        if from == to {
            return;
        }
        state.status = to;

        match to {
            CircuitStatus::Open => tracing::warn!(
                backend = %self.backend,
                from = from.as_str(),
                failures = state.consecutive_failures,
                cooldown_ms = self.settings.cooldown.as_millis() as u64,
                "Circuit opened"
            ),
            CircuitStatus::HalfOpen => {
                tracing::info!(backend = %self.backend, "Circuit half-open, allowing probe")
            }
            CircuitStatus::Closed => tracing::info!(backend = %self.backend, "Circuit closed"),
        }
        metrics::record_circuit_transition(&self.backend, to);
    }
}

/// One breaker per backend id, created on first use.
#[derive(Debug)]
pub struct CircuitBreakers {
    settings: BreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    /// The breaker for a backend. The shard lock is released before returning.
    pub fn get(&self, backend_id: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(backend_id) {
            return existing.clone();
        }
        self.breakers
            .entry(backend_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(backend_id, self.settings)))
            .clone()
    }

    pub fn allow(&self, backend_id: &str) -> bool {
        self.get(backend_id).allow()
    }

    pub fn record_success(&self, backend_id: &str) {
        self.get(backend_id).record_success();
    }

    pub fn record_failure(&self, backend_id: &str) {
        self.get(backend_id).record_failure();
    }

    /// Snapshots of every breaker seen so far, sorted by backend id.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        all.sort_by(|a, b| a.backend.cmp(&b.backend));
        all
    }
}
