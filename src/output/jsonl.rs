//! JSON Lines sink: one JSON object per line

use crate::output::traits::{FailureReport, FailureSink, Record, RecordSink, SinkResult};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Writes each item as a single line of JSON
pub struct JsonLinesSink {
    writer: Box<dyn Write + Send>,
    lines: u64,
}

impl JsonLinesSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer, lines: 0 }
    }

    /// Opens `path` for writing; `-` means stdout
    pub fn create(path: &str) -> io::Result<Self> {
        if path == "-" {
            return Ok(Self::new(Box::new(io::stdout())));
        }

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    fn write_line<T: Serialize>(&mut self, item: &T) -> SinkResult<()> {
        let mut line = serde_json::to_vec(item)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.lines += 1;
        Ok(())
    }
}

impl RecordSink for JsonLinesSink {
    fn emit(&mut self, record: Record) -> SinkResult<()> {
        self.write_line(&record)
    }

    fn flush(&mut self) -> SinkResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl FailureSink for JsonLinesSink {
    fn report(&mut self, failure: FailureReport) -> SinkResult<()> {
        self.write_line(&failure)
    }

    fn flush(&mut self) -> SinkResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}
