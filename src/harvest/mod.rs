//! Harvest module - paginated retrieval and normalization engine.
//!
//! This module provides the core pieces of one harvest run:
//! - **Transport**: 429-aware retry via [`RateLimitedTransport`]
//! - **Flatten**: nested records to flat rows via [`RecordFlattener`]
//! - **Dedup**: run-scoped seen-set via [`DeduplicationTracker`]
//! - **Pipeline**: the offset/cursor state machine via [`PaginationDriver`]
//! - **Formats**: per-endpoint configuration via [`HarvestKind`]

pub mod dedup;
pub mod flatten;
pub mod formats;
pub mod pipeline;
pub mod traits;
pub mod transport;

// Re-export commonly used types
pub use traits::{FieldMapping, FlattenSpec, HarvestFormat, SubStateLevel};

pub use dedup::DeduplicationTracker;
pub use flatten::RecordFlattener;
pub use formats::HarvestKind;
pub use pipeline::{
    ContinuationSignal, HarvestOutcome, HarvestState, HarvestStats, HarvestStatus, OffsetAdvance,
    PaginationDriver, PausePolicy, StopReason, Transition,
};
pub use transport::{BackoffPolicy, FetchedPage, RateLimitedTransport};
