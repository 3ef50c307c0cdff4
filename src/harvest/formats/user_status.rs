use chrono::NaiveDate;

use crate::config::Credentials;
use crate::harvest::pipeline::OffsetAdvance;
use crate::harvest::traits::{FieldMapping, FlattenSpec, HarvestFormat, SubStateLevel};
use crate::model::{DateFilterStyle, DateRange, OffsetPlacement};

/// User status metrics bucketed by 30 minute interval. Users with no
/// intervals produce no rows.
pub struct UserStatus;

impl HarvestFormat for UserStatus {
    fn name(&self) -> &'static str {
        "user-status"
    }

    fn description(&self) -> &'static str {
        "User status metrics per 30 minute interval, one row per interval and metric"
    }

    fn endpoint(&self, credentials: &Credentials) -> String {
        format!(
            "https://{}/agentassist/api/public/analytics/1.1/account/{}/userstatus",
            credentials.host, credentials.account_id
        )
    }

    fn date_filter(&self) -> DateFilterStyle {
        DateFilterStyle::DateSpan
    }

    fn offset_placement(&self) -> OffsetPlacement {
        OffsetPlacement::Body
    }

    fn offset_advance(&self) -> OffsetAdvance {
        OffsetAdvance::ServerReported { fallback: 50 }
    }

    fn flatten_spec(&self) -> FlattenSpec {
        FlattenSpec {
            entity_id: "userId".to_string(),
            parent_fields: vec![
                FieldMapping::new("userId", "User ID"),
                FieldMapping::new("firstName", "First Name"),
                FieldMapping::new("lastName", "Last Name"),
                FieldMapping::new("email", "Email"),
            ],
            levels: vec![
                SubStateLevel::new(
                    "timeInterval",
                    vec![
                        FieldMapping::new("startTime", "Start Time"),
                        FieldMapping::new("endTime", "End Time"),
                    ],
                ),
                SubStateLevel::new(
                    "status",
                    vec![
                        FieldMapping::new("metric", "Metric"),
                        FieldMapping::new("value", "Value"),
                        FieldMapping::new("stats.sum", "Duration (sec)"),
                    ],
                ),
            ],
            emit_empty_as_row: false,
        }
    }

    fn default_range(&self, today: NaiveDate) -> DateRange {
        DateRange::single(today)
    }

    /// IST (UTC+05:30), as minutes west of UTC.
    fn default_time_zone_offset(&self) -> i32 {
        -330
    }

    fn granularity(&self) -> Option<&'static str> {
        Some("PT30M")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NextPage;
    use serde_json::json;

    #[test]
    fn test_body_carries_offset_and_granularity() {
        let credentials = Credentials {
            host: "platform.test".into(),
            account_id: "acct-1".into(),
            auth_token: "jwt".into(),
            bot_id: "st-9".into(),
        };
        let date = NaiveDate::from_ymd_opt(2024, 11, 18).unwrap();
        let request = UserStatus.build_request(&credentials, UserStatus.default_range(date), None, None);
        let page = request.page_request(&NextPage::Offset(50));

        assert!(page.query.is_empty());
        assert_eq!(page.body["offset"], json!(50));
        assert_eq!(page.body["granularity"], json!("PT30M"));
        assert_eq!(
            page.body["filter"]["dateFilter"],
            json!({"startDate": "2024-11-18", "endDate": "2024-11-18", "timeZoneOffSet": -330})
        );
    }
}
