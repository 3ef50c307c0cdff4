use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{blocking, cell_text};
use crate::model::FlatRow;
use crate::traits::{Sink, SinkError, SinkReport};

/// Appends rows to a CSV file.
///
/// The header is written only when the file is new or empty. When the file
/// already has a header, rows are aligned to it: missing columns are left
/// empty and unknown columns are dropped.
///
/// Each batch is encoded in memory and appended with a single write, so a
/// failed write adds no rows and the whole batch can be sent again.
pub struct CsvSink {
    path: PathBuf,
    uppercase_columns: bool,
    chunk_rows: usize,
    header: Option<Vec<String>>,
}

/// One batch ready to append.
struct EncodedBatch {
    bytes: Vec<u8>,
    report: SinkReport,
    dropped: Vec<String>,
}

impl CsvSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            uppercase_columns: false,
            chunk_rows: 10_000,
            header: None,
        }
    }

    /// Upper-cases column names (warehouse naming).
    pub fn with_uppercase_columns(mut self, uppercase: bool) -> Self {
        self.uppercase_columns = uppercase;
        self
    }

    /// Rows per reported chunk.
    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn column_name(&self, column: &str) -> String {
        if self.uppercase_columns {
            column.to_uppercase()
        } else {
            column.to_string()
        }
    }

    fn header_for(&self, rows: &[FlatRow]) -> Vec<String> {
        let mut header: Vec<String> = Vec::new();
        for column in rows.iter().flat_map(|row| row.columns()) {
            let name = self.column_name(column);
            if !header.contains(&name) {
                header.push(name);
            }
        }
        header
    }

    fn encode(
        &self,
        header: &[String],
        write_header: bool,
        rows: &[FlatRow],
    ) -> Result<EncodedBatch, SinkError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if write_header {
            writer.write_record(header)?;
        }

        let mut dropped: Vec<String> = Vec::new();
        for row in rows {
            let cells: HashMap<String, String> = row
                .iter()
                .map(|(column, value)| (self.column_name(column), cell_text(value)))
                .collect();

            for name in cells.keys() {
                if !header.contains(name) && !dropped.contains(name) {
                    dropped.push(name.clone());
                }
            }

            let record: Vec<&str> = header
                .iter()
                .map(|column| cells.get(column).map(String::as_str).unwrap_or(""))
                .collect();
            writer.write_record(&record)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))?;
        Ok(EncodedBatch {
            bytes,
            report: SinkReport {
                rows_written: rows.len(),
                chunks: rows.len().div_ceil(self.chunk_rows),
            },
            dropped,
        })
    }
}

fn existing_header(path: &Path) -> Result<Option<Vec<String>>, SinkError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {}
        _ => return Ok(None),
    }
    let mut reader = csv::Reader::from_path(path)?;
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    Ok((!header.is_empty()).then_some(header))
}

fn append(path: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}

#[async_trait]
impl Sink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn write(&mut self, rows: &[FlatRow]) -> Result<SinkReport, SinkError> {
        if rows.is_empty() {
            return Ok(SinkReport::default());
        }

        if self.header.is_none() {
            let path = self.path.clone();
            self.header = blocking(move || existing_header(&path)).await?;
        }

        let (header, new_header) = match self.header.clone() {
            Some(header) => (header, false),
            None => (self.header_for(rows), true),
        };
        let batch = self.encode(&header, new_header, rows)?;

        let path = self.path.clone();
        let bytes = batch.bytes;
        blocking(move || append(&path, &bytes)).await?;

        if new_header {
            debug!(path = %self.path.display(), columns = header.len(), "Wrote CSV header");
            self.header = Some(header);
        }
        if !batch.dropped.is_empty() {
            warn!(
                path = %self.path.display(),
                columns = ?batch.dropped,
                "Columns not in existing CSV header were dropped"
            );
        }
        Ok(batch.report)
    }
}
