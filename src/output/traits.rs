//! Sink traits and the types that flow through them
//!
//! The result processor is the only caller; it owns its sinks exclusively,
//! so the traits take `&mut self` and are synchronous.

use crate::crawler::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur while writing to a sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Structured data extracted from one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub source_url: String,

    /// Field name to value; missing optional fields are `null`
    pub fields: BTreeMap<String, Value>,
}

/// A URL that failed permanently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub url: String,
    pub error_kind: ErrorKind,
    /// Fetch attempts made, including the last one
    pub attempts: u32,
    pub message: String,
}

/// Consumer of extracted records
pub trait RecordSink: Send {
    fn emit(&mut self, record: Record) -> SinkResult<()>;

    fn flush(&mut self) -> SinkResult<()> {
        Ok(())
    }
}

/// Consumer of permanent failure reports
pub trait FailureSink: Send {
    fn report(&mut self, failure: FailureReport) -> SinkResult<()>;

    fn flush(&mut self) -> SinkResult<()> {
        Ok(())
    }
}
