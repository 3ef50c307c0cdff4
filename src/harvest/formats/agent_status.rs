use chrono::{Days, NaiveDate};

use crate::config::Credentials;
use crate::harvest::pipeline::OffsetAdvance;
use crate::harvest::traits::{FieldMapping, FlattenSpec, HarvestFormat, SubStateLevel};
use crate::model::{DateFilterStyle, DateRange, OffsetPlacement};

/// Agent status details: every status change of every agent for one day,
/// one row per change. Agents without changes still get a row.
pub struct AgentStatus;

impl HarvestFormat for AgentStatus {
    fn name(&self) -> &'static str {
        "agent-status"
    }

    fn description(&self) -> &'static str {
        "Agent status changes for one day, one row per status"
    }

    fn endpoint(&self, credentials: &Credentials) -> String {
        format!(
            "https://{}/agentassist/api/public/analytics/account/{}/agentstatusdetails",
            credentials.host, credentials.account_id
        )
    }

    fn date_filter(&self) -> DateFilterStyle {
        DateFilterStyle::SingleDate
    }

    fn offset_placement(&self) -> OffsetPlacement {
        OffsetPlacement::Query
    }

    fn offset_advance(&self) -> OffsetAdvance {
        OffsetAdvance::ServerReported { fallback: 50 }
    }

    fn flatten_spec(&self) -> FlattenSpec {
        FlattenSpec {
            entity_id: "userId".to_string(),
            parent_fields: ["userId", "firstName", "lastName", "email", "customId"]
                .into_iter()
                .map(FieldMapping::same)
                .collect(),
            levels: vec![SubStateLevel::new(
                "status",
                [
                    "primaryStatus",
                    "secondaryStatus",
                    "startTime",
                    "endTime",
                    "duration",
                ]
                .into_iter()
                .map(FieldMapping::same)
                .collect(),
            )],
            emit_empty_as_row: true,
        }
    }

    fn default_range(&self, today: NaiveDate) -> DateRange {
        DateRange::single(today.checked_sub_days(Days::new(1)).unwrap_or(today))
    }
}
