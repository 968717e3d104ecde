//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → broadcast → server stops accepting, drains
//!                           → reload applier and result sweeper exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → SignalEvent::Shutdown
//!     SIGHUP         → SignalEvent::Reload (re-read config, swap backend table)
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{next_signal, SignalEvent};
