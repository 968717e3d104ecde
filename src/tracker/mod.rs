//! Result/metadata tracker.
//!
//! # Data Flow
//! ```text
//! dispatchers / orchestrator
//!     → ResultTracker::record (try_send into bounded channel, never waits)
//!     → worker task
//!     → RecordSink (metrics + logs, or memory for inspection)
//! ```
//!
//! # Design Decisions
//! - The dispatch path never blocks on observability; a full buffer drops the
//!   record and bumps a counter
//! - One record per request, written when the request reaches a terminal state

pub mod record;
pub mod sink;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::observability::metrics;

pub use record::{DispatchMode, Outcome, ResultRecord};
pub use sink::{FanoutSink, MemorySink, MetricsSink, RecordSink};

#[derive(Debug, Default)]
struct TrackerCounters {
    recorded: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// Tracker counters at a point in time.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TrackerStats {
    pub recorded: u64,
    pub forwarded: u64,
    pub dropped: u64,
}

/// Fire-and-forget handle to the record pipeline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ResultTracker {
    tx: mpsc::Sender<ResultRecord>,
    counters: Arc<TrackerCounters>,
}

impl ResultTracker {
    /// Start the forwarding worker. Must be called inside a Tokio runtime.
    ///
    /// The worker exits once every tracker handle is dropped.
    pub fn spawn(capacity: usize, sink: Arc<dyn RecordSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<ResultRecord>(capacity.max(1));
        let counters = Arc::new(TrackerCounters::default());

        let worker_counters = counters.clone();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                sink.emit(&record);
                worker_counters.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            tracing::debug!("Result tracker worker stopped");
        });

        Self { tx, counters }
    }

    /// Queue a record for forwarding. Never waits.
    pub fn record(&self, record: ResultRecord) {
        self.counters.recorded.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.tx.try_send(record) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_tracker_dropped();
            tracing::debug!(error = %e, "Result record dropped");
        }
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}
