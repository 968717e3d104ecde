//! Backend registry subsystem.
//!
//! # Data Flow
//! ```text
//! BackendConfig[] (startup, reload, admin API)
//!     → descriptor.rs (validate, build immutable BackendDescriptor)
//!     → table.rs (copy-on-write HashMap behind ArcSwap)
//!
//! Request path:
//!     lookup(backend_id) → Arc<BackendDescriptor> | UnknownBackend
//! ```
//!
//! # Design Decisions
//! - Descriptors never mutate; a pattern change is a new descriptor
//! - Writers publish a whole new table; readers never block or see partial state
//! - Batches already accumulating keep the descriptor they started with

pub mod descriptor;
pub mod table;

use thiserror::Error;

pub use descriptor::{BackendDescriptor, Pattern};
pub use table::BackendRegistry;

/// Errors from registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("backend '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("backend '{0}' is not registered")]
    NotRegistered(String),
    #[error("backend '{id}' is invalid: {reason}")]
    InvalidDescriptor { id: String, reason: String },
}
