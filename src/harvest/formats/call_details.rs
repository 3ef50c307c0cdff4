use chrono::{Days, NaiveDate};

use crate::config::Credentials;
use crate::harvest::pipeline::{ContinuationSignal, OffsetAdvance};
use crate::harvest::traits::{FieldMapping, FlattenSpec, HarvestFormat};
use crate::model::{DateFilterStyle, DateRange, OffsetPlacement};

/// Source field → warehouse column for call sessions. `reason` and `Reason`
/// both exist in the payload and land in separate columns.
const COLUMNS: &[(&str, &str)] = &[
    ("sessionId", "SESSIONID"),
    ("channel", "CHANNEL"),
    ("sessionStartTime", "SESSIONSTARTTIME"),
    ("sessionEndTime", "SESSIONENDTIME"),
    ("botId", "BOTID"),
    ("userId", "USERID"),
    ("channelSpecificUserId", "CHANNELSPECIFICUSERID"),
    ("orgId", "ORGID"),
    ("smartStatus", "SMARTSTATUS"),
    ("reason", "REASON"),
    ("finalStatus", "FINALSTATUS"),
    ("conversationId", "CONVERSATIONID"),
    ("isVoicemail", "ISVOICEMAIL"),
    ("Direction", "DIRECTION"),
    ("Reason", "REASON_2"),
    ("dispositions", "DISPOSITIONS"),
    ("dispositionRemarks", "DISPOSITIONREMARKS"),
    ("metaInfo", "METAINFO"),
    ("destinations", "DESTINATIONS"),
    ("csatScore", "CSATSCORE"),
];

/// Call session details: one row per session. This endpoint has no
/// `hasMore` flag; paging stops when `numResults` drops to zero.
pub struct CallDetails;

impl HarvestFormat for CallDetails {
    fn name(&self) -> &'static str {
        "call-details"
    }

    fn description(&self) -> &'static str {
        "Call session details for one day, one row per session"
    }

    fn endpoint(&self, credentials: &Credentials) -> String {
        format!(
            "https://{}/agentassist/api/public/analytics/account/{}/v2/calldetails",
            credentials.host, credentials.account_id
        )
    }

    fn date_filter(&self) -> DateFilterStyle {
        DateFilterStyle::Timestamps
    }

    fn offset_placement(&self) -> OffsetPlacement {
        OffsetPlacement::Query
    }

    fn offset_advance(&self) -> OffsetAdvance {
        OffsetAdvance::Fixed(100)
    }

    fn continuation(&self) -> ContinuationSignal {
        ContinuationSignal::ResultCount
    }

    fn flatten_spec(&self) -> FlattenSpec {
        FlattenSpec {
            entity_id: "sessionId".to_string(),
            parent_fields: COLUMNS
                .iter()
                .map(|(source, column)| FieldMapping::new(*source, *column))
                .collect(),
            levels: vec![],
            emit_empty_as_row: true,
        }
    }

    fn default_range(&self, today: NaiveDate) -> DateRange {
        DateRange::single(today.checked_sub_days(Days::new(1)).unwrap_or(today))
    }

    fn headers(&self, credentials: &Credentials) -> Vec<(String, String)> {
        vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("accountid".to_string(), credentials.account_id.clone()),
            ("app-language".to_string(), "en".to_string()),
            ("referer".to_string(), "smartassist".to_string()),
            ("auth".to_string(), credentials.auth_token.clone()),
            ("iid".to_string(), credentials.bot_id.clone()),
        ]
    }
}
