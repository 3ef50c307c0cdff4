//! [`Sink`] implementations.
//!
//! - [`CsvSink`]: append-only CSV file
//! - [`JsonSink`]: JSON array of records
//! - [`MemorySink`]: in-memory collector

mod csv_sink;
mod json_sink;

pub use csv_sink::CsvSink;
pub use json_sink::JsonSink;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{SinkConfig, SinkKind};
use crate::model::FlatRow;
use crate::traits::{Sink, SinkError, SinkReport};

/// Builds the sink described by `config`.
pub fn from_config(config: &SinkConfig) -> Box<dyn Sink> {
    match config.kind {
        SinkKind::Csv => Box::new(
            CsvSink::new(&config.path)
                .with_uppercase_columns(config.uppercase_columns)
                .with_chunk_rows(config.chunk_rows),
        ),
        SinkKind::Json => Box::new(JsonSink::new(&config.path)),
    }
}

/// Runs file I/O off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, SinkError>
where
    F: FnOnce() -> Result<T, SinkError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

/// Renders one cell for text outputs: `null` is empty, strings are bare.
pub(crate) fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Keeps every row it is given. Can be told to reject the next writes.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Vec<FlatRow>,
    writes: usize,
    failures_left: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the next `count` writes.
    pub fn failing(count: usize) -> Self {
        Self {
            failures_left: count,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> &[FlatRow] {
        &self.rows
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&mut self, rows: &[FlatRow]) -> Result<SinkReport, SinkError> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(SinkError::Rejected(format!(
                "{} rows refused",
                rows.len()
            )));
        }
        self.rows.extend_from_slice(rows);
        self.writes += 1;
        Ok(SinkReport {
            rows_written: rows.len(),
            chunks: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_sink_failure_injection() {
        let mut row = FlatRow::new();
        row.insert("userId", json!("u-1"));

        let mut sink = MemorySink::failing(1);
        assert!(matches!(
            sink.write(&[row.clone()]).await,
            Err(SinkError::Rejected(_))
        ));
        let report = sink.write(&[row]).await.unwrap();
        assert_eq!(report.rows_written, 1);
        assert_eq!(sink.rows().len(), 1);
        assert_eq!(sink.writes(), 1);
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&json!("busy")), "busy");
        assert_eq!(cell_text(&json!(12.5)), "12.5");
        assert_eq!(cell_text(&json!(true)), "true");
    }
}
