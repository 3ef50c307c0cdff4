use crate::model::{ApiRequest, ApiResponse, FlatRow};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Rate limit still in effect after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Sink rejected rows: {0}")]
    Rejected(String),
    #[error("Sink task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// What a sink reports back after a successful write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub rows_written: usize,
    pub chunks: usize,
}

impl SinkReport {
    pub fn merge(&mut self, other: SinkReport) {
        self.rows_written += other.rows_written;
        self.chunks += other.chunks;
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request. Only request-level failures (connect, timeout) are
    /// errors; every HTTP status comes back as a response.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        (**self).send(request).await
    }
}

#[async_trait]
pub trait Sink: Send {
    /// Short label used in logs (e.g., "csv", "json").
    fn name(&self) -> &str;

    /// Persists a batch of rows.
    async fn write(&mut self, rows: &[FlatRow]) -> Result<SinkReport, SinkError>;
}
