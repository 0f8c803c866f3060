//! In-memory collector sink
//!
//! Clones share the same buffers, so a caller can keep one handle and give
//! another to the orchestrator.

use crate::output::traits::{FailureReport, FailureSink, Record, RecordSink, SinkResult};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Record>>>,
    failures: Arc<Mutex<Vec<FailureReport>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn failures(&self) -> Vec<FailureReport> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RecordSink for MemorySink {
    fn emit(&mut self, record: Record) -> SinkResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

impl FailureSink for MemorySink {
    fn report(&mut self, failure: FailureReport) -> SinkResult<()> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
        Ok(())
    }
}
