//! Dispatch paths to model backends.
//!
//! # Data Flow
//! ```text
//! orchestrator
//!     → realtime.rs  (RealTime, or Hybrid + urgent): call now, retry, answer
//!     → batch.rs     (BulkOnly, or Hybrid + deferrable): queue, flush, fan out
//!     → hybrid.rs    picks between the two on urgency
//!
//! every path → client.rs (ModelClient) → backend
//!            → circuit breaker (one outcome per call, not per member)
//!            → result tracker (one record per request)
//! ```

pub mod batch;
pub mod client;
pub mod hybrid;
pub mod realtime;

pub use batch::{BatchAccumulator, BatchState, CancelHandle, FlushTrigger, PendingResult};
pub use client::{BackendCallError, HttpModelClient, ModelClient};
pub use hybrid::HybridRouter;
pub use realtime::RealTimeDispatcher;
