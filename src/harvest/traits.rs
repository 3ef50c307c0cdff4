//! Core traits and types for the harvest engine.
//!
//! - [`HarvestFormat`]: one analytics endpoint family (request shape,
//!   pagination style, and how its records flatten)
//! - [`FlattenSpec`]: the field-mapping table that drives
//!   [`RecordFlattener`](crate::harvest::flatten::RecordFlattener)

use chrono::NaiveDate;

use crate::config::Credentials;
use crate::harvest::pipeline::{ContinuationSignal, OffsetAdvance};
use crate::model::{DateFilterStyle, DateRange, HarvestRequest, OffsetPlacement};

// ============================================================================
// Flatten Configuration
// ============================================================================

/// Maps one source field onto one output column.
///
/// `source` may be a dotted path into nested objects (e.g. `"stats.sum"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub source: String,
    pub column: String,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            column: column.into(),
        }
    }

    /// Keeps the source name as the column name.
    pub fn same(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            column: name,
        }
    }
}

/// One nested list that expands into rows (e.g. `status`, or `timeInterval`
/// followed by its inner `status`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubStateLevel {
    /// Name of the list field on the parent object.
    pub list_field: String,

    /// Fields copied from each element of the list.
    pub fields: Vec<FieldMapping>,
}

impl SubStateLevel {
    pub fn new(list_field: impl Into<String>, fields: Vec<FieldMapping>) -> Self {
        Self {
            list_field: list_field.into(),
            fields,
        }
    }
}

/// Field-mapping table for one harvest kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenSpec {
    /// Source field holding the entity id used for deduplication.
    pub entity_id: String,

    /// Parent fields copied into every row of the entity.
    pub parent_fields: Vec<FieldMapping>,

    /// Nested levels, outermost first. Empty means one row per record.
    pub levels: Vec<SubStateLevel>,

    /// What to do when an entity has no sub-states: emit one row with null
    /// sub-state columns (`true`) or nothing (`false`).
    pub emit_empty_as_row: bool,
}

// ============================================================================
// Harvest Format Trait
// ============================================================================

/// An analytics endpoint family the harvester knows how to page through.
///
/// Each implementation supplies the URL, the body layout, the pagination
/// strategy and the flatten table; the engine itself is shared.
pub trait HarvestFormat: Send + Sync {
    /// Identifier used on the command line (e.g., `"agent-status"`).
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Full endpoint URL for this account.
    fn endpoint(&self, credentials: &Credentials) -> String;

    fn date_filter(&self) -> DateFilterStyle;

    fn offset_placement(&self) -> OffsetPlacement;

    fn offset_advance(&self) -> OffsetAdvance;

    /// Field that decides whether another page is requested.
    fn continuation(&self) -> ContinuationSignal {
        ContinuationSignal::HasMoreFlag
    }

    fn flatten_spec(&self) -> FlattenSpec;

    /// Date range harvested when the caller does not pick one.
    fn default_range(&self, today: NaiveDate) -> DateRange;

    fn default_time_zone_offset(&self) -> i32 {
        0
    }

    fn granularity(&self) -> Option<&'static str> {
        None
    }

    /// Request headers. The default carries the auth token and bot id.
    fn headers(&self, credentials: &Credentials) -> Vec<(String, String)> {
        vec![
            ("Accept".to_string(), "*/*".to_string()),
            ("auth".to_string(), credentials.auth_token.clone()),
            ("iid".to_string(), credentials.bot_id.clone()),
        ]
    }

    /// Assembles the immutable request for one run.
    fn build_request(
        &self,
        credentials: &Credentials,
        date_range: DateRange,
        time_zone_offset: Option<i32>,
        page_size: Option<u64>,
    ) -> HarvestRequest {
        HarvestRequest {
            endpoint: self.endpoint(credentials),
            date_range,
            time_zone_offset: time_zone_offset.unwrap_or_else(|| self.default_time_zone_offset()),
            page_size,
            headers: self.headers(credentials),
            date_filter: self.date_filter(),
            offset_placement: self.offset_placement(),
            granularity: self.granularity().map(str::to_string),
        }
    }
}
