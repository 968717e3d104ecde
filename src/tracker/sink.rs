//! Destinations for result records.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::observability::metrics;
use crate::tracker::ResultRecord;

/// Where the tracker forwards records. Implementations must not block.
pub trait RecordSink: Send + Sync + 'static {
    fn emit(&self, record: &ResultRecord);
}

/// Default sink: metrics facade plus a debug log line.
#[derive(Debug, Default)]
pub struct MetricsSink;

impl RecordSink for MetricsSink {
    fn emit(&self, record: &ResultRecord) {
        metrics::record_dispatch(record);
        tracing::debug!(
            request_id = %record.request_id,
            backend = %record.backend_id,
            mode = record.mode.as_str(),
            outcome = record.outcome.as_str(),
            attempts = record.attempts,
            batch_id = ?record.batch_id,
            processing_time_ms = record.processing_time_ms,
            error = ?record.error,
            "Result recorded"
        );
    }
}

/// Keeps the most recent records in memory.
#[derive(Debug)]
pub struct MemorySink {
    limit: usize,
    records: Mutex<VecDeque<ResultRecord>>,
}

impl MemorySink {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Copy of the retained records, oldest first.
    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordSink for MemorySink {
    fn emit(&self, record: &ResultRecord) {
        let mut records = self.records.lock();
        if records.len() == self.limit {
            records.pop_front();
        }
        records.push_back(record.clone());
    }
}

/// Sends every record to each inner sink in order.
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn RecordSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<std::sync::Arc<dyn RecordSink>>) -> Self {
        Self { sinks }
    }
}

impl RecordSink for FanoutSink {
    fn emit(&self, record: &ResultRecord) {
        for sink in &self.sinks {
            sink.emit(record);
        }
    }
}
