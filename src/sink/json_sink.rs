use async_trait::async_trait;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::blocking;
use crate::model::FlatRow;
use crate::traits::{Sink, SinkError, SinkReport};

/// Writes rows as a pretty-printed JSON array of records.
///
/// The file always holds every row this sink has received, so repeated
/// writes (streaming delivery) keep it a valid array.
pub struct JsonSink {
    path: PathBuf,
    written: Vec<FlatRow>,
}

impl JsonSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            written: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows acknowledged so far.
    pub fn written(&self) -> &[FlatRow] {
        &self.written
    }

    async fn rewrite(&self) -> Result<(), SinkError> {
        let mut bytes = serde_json::to_vec_pretty(&self.written)?;
        bytes.push(b'\n');

        let path = self.path.clone();
        blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = File::create(&path)?;
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl Sink for JsonSink {
    fn name(&self) -> &str {
        "json"
    }

    async fn write(&mut self, rows: &[FlatRow]) -> Result<SinkReport, SinkError> {
        let acknowledged = self.written.len();
        self.written.extend_from_slice(rows);

        if let Err(e) = self.rewrite().await {
            self.written.truncate(acknowledged);
            return Err(e);
        }

        debug!(path = %self.path.display(), total = self.written.len(), "Wrote JSON records");
        Ok(SinkReport {
            rows_written: rows.len(),
            chunks: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_creates_directory_and_keeps_array_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Data/call_details.json");

        let mut first = FlatRow::new();
        first.insert("SESSIONID", json!("s-1"));
        let mut second = FlatRow::new();
        second.insert("SESSIONID", json!("s-2"));
        second.insert("CSATSCORE", Value::Null);

        let mut sink = JsonSink::new(&path);
        sink.write(&[first]).await.unwrap();
        let report = sink.write(&[second]).await.unwrap();
        assert_eq!(report.rows_written, 1);

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            parsed,
            json!([{"SESSIONID": "s-1"}, {"SESSIONID": "s-2", "CSATSCORE": null}])
        );
    }

    #[tokio::test]
    async fn test_failed_write_is_not_kept() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("Data");
        std::fs::write(&blocker, "not a directory").unwrap();

        let mut row = FlatRow::new();
        row.insert("SESSIONID", json!("s-1"));

        let mut sink = JsonSink::new(blocker.join("call_details.json"));
        assert!(sink.write(&[row.clone()]).await.is_err());
        assert!(sink.written().is_empty());

        std::fs::remove_file(&blocker).unwrap();
        sink.write(&[row]).await.unwrap();
        assert_eq!(sink.written().len(), 1);

        let parsed: Value =
            serde_json::from_str(&std::fs::read_to_string(sink.path()).unwrap()).unwrap();
        assert_eq!(parsed, json!([{"SESSIONID": "s-1"}]));
    }
}
