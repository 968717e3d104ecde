//! Inference gateway dispatch engine.
//!
//! Routes each request to its model backend according to the backend's
//! processing pattern: real-time, batched, or hybrid on a per-request
//! urgency flag. Every backend sits behind its own circuit breaker and every
//! request leaves exactly one result record.

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod http;
pub mod registry;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod tracker;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{PatternOrchestrator, Submission};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
