//! Output module: where records and failure reports go
//!
//! This module handles:
//! - JSON Lines sinks (file or stdout)
//! - The SQLite sink
//! - An in-memory collector
//! - End-of-crawl statistics

mod jsonl;
mod memory;
mod schema;
mod sqlite;
pub mod stats;
mod traits;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;
pub use sqlite::SqliteSink;
pub use stats::print_report;
pub use traits::{FailureReport, FailureSink, Record, RecordSink, SinkError, SinkResult};

use crate::config::OutputConfig;
use std::path::Path;

/// Opens the sinks described by the output configuration
///
/// With `database-path` set, both streams go to SQLite; otherwise records
/// and failures are written as JSON Lines.
pub fn open_sinks(
    config: &OutputConfig,
    config_hash: &str,
) -> SinkResult<(Box<dyn RecordSink>, Box<dyn FailureSink>)> {
    if let Some(database_path) = &config.database_path {
        let sink = SqliteSink::open(Path::new(database_path), config_hash)?;
        return Ok((Box::new(sink.clone()), Box::new(sink)));
    }

    let records = JsonLinesSink::create(&config.records_path)?;
    let failures = JsonLinesSink::create(&config.failures_path)?;
    Ok((Box::new(records), Box::new(failures)))
}
