//! Request entry point.
//!
//! # Data Flow
//! ```text
//! submit(backend_id, payload, urgent)
//!     → registry lookup          (UnknownBackend)
//!     → circuit breaker allow()  (BackendUnavailable)
//!     → match pattern
//!         RealTime → RealTimeDispatcher      → Submission::Ready
//!         Hybrid   → HybridRouter            → Ready | Queued
//!         BulkOnly → BatchAccumulator        → Submission::Queued
//! ```

pub mod orchestrator;
pub mod request;

pub use orchestrator::PatternOrchestrator;
pub use request::{InferenceRequest, InferenceResponse, RequestState, Submission};
