//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, reload applier, sweeper)
//!     → request.rs (body parsing and validation)
//!     → handlers.rs → PatternOrchestrator
//!         Ready  → 200 InferenceResponse
//!         Queued → results.rs (poll/cancel slot) → 202 QueuedResponse
//!     → response.rs (error → status mapping)
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod results;
pub mod server;

pub use results::ResultStore;
pub use server::{AppState, HttpServer};
