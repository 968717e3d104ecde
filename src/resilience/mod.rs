//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to backend (real-time or batch):
//!     → circuit_breaker.rs (gate: may this backend receive traffic?)
//!     → tokio::time::timeout (per-call deadline from the descriptor)
//!     → On failure: retries.rs (is it retryable?) + backoff.rs (how long to wait)
//!     → circuit_breaker.rs (record outcome, open circuit if threshold exceeded)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend call has a deadline
//! - Retries stop as soon as the breaker stops allowing the backend
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{
    Admission, BreakerSettings, CircuitBreaker, CircuitBreakers, CircuitSnapshot, CircuitStatus,
};
pub use retries::RetryPolicy;
