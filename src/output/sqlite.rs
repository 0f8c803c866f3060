//! SQLite sink
//!
//! Records and failure reports are written to one database file, tagged
//! with a run row that carries the configuration hash. [`SqliteSink`] is
//! cheap to clone; clones share the connection so the same database can
//! serve as both the record and the failure sink.

use crate::crawler::ErrorKind;
use crate::output::schema::initialize_schema;
use crate::output::traits::{FailureReport, FailureSink, Record, RecordSink, SinkResult};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone)]
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
    run_id: i64,
}

impl SqliteSink {
    /// Opens (or creates) the database and starts a new run
    pub fn open(path: &Path, config_hash: &str) -> SinkResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        Self::with_connection(conn, config_hash)
    }

    pub fn open_in_memory(config_hash: &str) -> SinkResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::with_connection(conn, config_hash)
    }

    fn with_connection(conn: Connection, config_hash: &str) -> SinkResult<Self> {
        initialize_schema(&conn)?;
        conn.execute(
            "INSERT INTO runs (started_at, config_hash) VALUES (?1, ?2)",
            params![Utc::now().to_rfc3339(), config_hash],
        )?;
        let run_id = conn.last_insert_rowid();

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            run_id,
        })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_run(&self) -> SinkResult<()> {
        self.conn().execute(
            "UPDATE runs SET finished_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), self.run_id],
        )?;
        Ok(())
    }

    pub fn record_count(&self) -> SinkResult<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM records WHERE run_id = ?1",
            params![self.run_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn failure_count(&self) -> SinkResult<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM failures WHERE run_id = ?1",
            params![self.run_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl RecordSink for SqliteSink {
    fn emit(&mut self, record: Record) -> SinkResult<()> {
        let fields = serde_json::to_string(&record.fields)?;
        self.conn().execute(
            "INSERT INTO records (run_id, source_url, fields, emitted_at) VALUES (?1, ?2, ?3, ?4)",
            params![self.run_id, record.source_url, fields, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn flush(&mut self) -> SinkResult<()> {
        self.finish_run()
    }
}

impl FailureSink for SqliteSink {
    fn report(&mut self, failure: FailureReport) -> SinkResult<()> {
        let status_code = match failure.error_kind {
            ErrorKind::HttpStatus(code) => Some(code),
            _ => None,
        };

        self.conn().execute(
            "INSERT INTO failures (run_id, url, error_kind, status_code, attempts, message, reported_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.run_id,
                failure.url,
                failure.error_kind.to_string(),
                status_code,
                failure.attempts,
                failure.message,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn flush(&mut self) -> SinkResult<()> {
        self.finish_run()
    }
}
