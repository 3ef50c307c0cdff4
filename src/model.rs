use chrono::NaiveDate;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use std::time::Duration;

/// One source entity as returned by the analytics API (an agent or a call session).
pub type RawRecord = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }
}

/// How the date filter is laid out in the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilterStyle {
    /// `{"filter":{"dateFilter":{"date": ..., "timeZoneOffSet": ...}}}`
    SingleDate,
    /// `{"filter":{"dateFilter":{"startDate": ..., "endDate": ..., "timeZoneOffSet": ...}}}`
    DateSpan,
    /// `{"startDate": "YYYY-MM-DD HH:MM:SS", "endDate": ..., "timeZoneOffset": ...}`
    Timestamps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetPlacement {
    Query,
    Body,
}

/// Immutable per-run parameters. Built once and turned into one
/// [`ApiRequest`] per page via [`HarvestRequest::page_request`].
#[derive(Debug, Clone)]
pub struct HarvestRequest {
    pub endpoint: String,
    pub date_range: DateRange,
    pub time_zone_offset: i32, // minutes
    pub page_size: Option<u64>,
    pub headers: Vec<(String, String)>,
    pub date_filter: DateFilterStyle,
    pub offset_placement: OffsetPlacement,
    pub granularity: Option<String>, // e.g. "PT30M"
}

impl HarvestRequest {
    /// Builds the request for the page starting at `position`.
    pub fn page_request(&self, position: &NextPage) -> ApiRequest {
        let mut body = self.body();
        let mut query = Vec::new();

        let (key, value) = match position {
            NextPage::Offset(offset) => ("offset", Value::from(*offset)),
            NextPage::Cursor(cursor) => ("cursor", Value::from(cursor.as_str())),
        };

        match self.offset_placement {
            OffsetPlacement::Query => {
                query.push((key.to_string(), position.to_string()));
                if let Some(limit) = self.page_size {
                    query.push(("limit".to_string(), limit.to_string()));
                }
            }
            OffsetPlacement::Body => {
                if let Some(obj) = body.as_object_mut() {
                    obj.insert(key.to_string(), value);
                    if let Some(limit) = self.page_size {
                        obj.insert("limit".to_string(), Value::from(limit));
                    }
                }
            }
        }

        ApiRequest {
            url: self.endpoint.clone(),
            query,
            headers: self.headers.clone(),
            body,
        }
    }

    fn body(&self) -> Value {
        let start = self.date_range.start;
        let end = self.date_range.end;
        let mut body = match self.date_filter {
            DateFilterStyle::SingleDate => serde_json::json!({
                "filter": {
                    "dateFilter": {
                        "date": start.format("%Y-%m-%d").to_string(),
                        "timeZoneOffSet": self.time_zone_offset,
                    }
                }
            }),
            DateFilterStyle::DateSpan => serde_json::json!({
                "filter": {
                    "dateFilter": {
                        "startDate": start.format("%Y-%m-%d").to_string(),
                        "endDate": end.format("%Y-%m-%d").to_string(),
                        "timeZoneOffSet": self.time_zone_offset,
                    }
                }
            }),
            DateFilterStyle::Timestamps => serde_json::json!({
                "startDate": format!("{} 00:00:00", start.format("%Y-%m-%d")),
                "endDate": format!("{} 23:59:59", end.format("%Y-%m-%d")),
                "timeZoneOffset": self.time_zone_offset,
            }),
        };

        if let (Some(granularity), Some(obj)) = (&self.granularity, body.as_object_mut()) {
            obj.insert("granularity".to_string(), Value::from(granularity.clone()));
        }
        body
    }
}

/// A single POST to the analytics API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl ApiRequest {
    pub fn offset(&self) -> Option<u64> {
        self.query
            .iter()
            .find(|(k, _)| k == "offset")
            .and_then(|(_, v)| v.parse().ok())
            .or_else(|| self.body.get("offset").and_then(Value::as_u64))
    }

    pub fn cursor(&self) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == "cursor")
            .map(|(_, v)| v.as_str())
            .or_else(|| self.body.get("cursor").and_then(Value::as_str))
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.to_string().into_bytes(),
        }
    }
}

/// Where the next page starts: a record offset or an opaque server cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPage {
    Offset(u64),
    Cursor(String),
}

impl NextPage {
    pub fn offset(&self) -> Option<u64> {
        match self {
            NextPage::Offset(offset) => Some(*offset),
            NextPage::Cursor(_) => None,
        }
    }
}

impl Default for NextPage {
    fn default() -> Self {
        NextPage::Offset(0)
    }
}

impl std::fmt::Display for NextPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NextPage::Offset(offset) => write!(f, "{offset}"),
            NextPage::Cursor(cursor) => f.write_str(cursor),
        }
    }
}

/// One decoded API response.
///
/// `records` is `None` when the body had no `data` array (or was not JSON at
/// all); the driver treats that as the end of the data, not as a failure.
/// The pagination fields are read independently of `data`: a field with an
/// unexpected type is treated as absent.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Option<Vec<RawRecord>>,
    pub has_more: Option<bool>,
    pub num_results: Option<u64>,
    pub limit: Option<u64>,
    pub next_page: Option<NextPage>,
}

impl Page {
    /// Decodes a response body. Never fails: shapes that cannot be read come
    /// back as a page without records.
    pub fn from_slice(body: &[u8]) -> Self {
        let mut envelope = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => map,
            _ => return Self::default(),
        };

        let records = match envelope.remove("data") {
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        };

        Self {
            records,
            has_more: envelope.get("hasMore").and_then(lenient_bool),
            num_results: envelope.get("numResults").and_then(lenient_u64),
            limit: envelope.get("limit").and_then(lenient_u64),
            next_page: envelope.get("nextOffset").and_then(next_page),
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.records.is_none()
    }

    pub fn len(&self) -> usize {
        self.records.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Numbers (and numeric strings) are offsets; any other non-empty string is
/// a cursor.
fn next_page(value: &Value) -> Option<NextPage> {
    if let Some(offset) = lenient_u64(value) {
        return Some(NextPage::Offset(offset));
    }
    match value {
        Value::String(cursor) if !cursor.trim().is_empty() => {
            Some(NextPage::Cursor(cursor.clone()))
        }
        _ => None,
    }
}

/// A fully denormalized output row. Column order is insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRow {
    fields: Vec<(String, Value)>,
}

impl FlatRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column, replacing an existing value of the same name.
    /// Arrays and objects are stored as their JSON text.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        let value = match value {
            Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
            scalar => scalar,
        };
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for FlatRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (column, value) in &self.fields {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(style: DateFilterStyle, placement: OffsetPlacement) -> HarvestRequest {
        HarvestRequest {
            endpoint: "https://analytics.test/userstatus".to_string(),
            date_range: DateRange {
                start: NaiveDate::from_ymd_opt(2024, 11, 18).unwrap(),
                end: NaiveDate::from_ymd_opt(2024, 11, 19).unwrap(),
            },
            time_zone_offset: -330,
            page_size: None,
            headers: vec![("auth".to_string(), "token".to_string())],
            date_filter: style,
            offset_placement: placement,
            granularity: None,
        }
    }

    #[test]
    fn test_query_offset_placement() {
        let req = request(DateFilterStyle::SingleDate, OffsetPlacement::Query).page_request(&NextPage::Offset(150));
        assert_eq!(req.query, vec![("offset".to_string(), "150".to_string())]);
        assert_eq!(req.body["filter"]["dateFilter"]["date"], "2024-11-18");
        assert_eq!(req.body["filter"]["dateFilter"]["timeZoneOffSet"], -330);
        assert!(req.body.get("offset").is_none());
        assert_eq!(req.offset(), Some(150));
    }

    #[test]
    fn test_body_offset_placement_with_granularity() {
        let mut base = request(DateFilterStyle::DateSpan, OffsetPlacement::Body);
        base.granularity = Some("PT30M".to_string());
        base.page_size = Some(25);
        let req = base.page_request(&NextPage::Offset(50));

        assert!(req.query.is_empty());
        assert_eq!(req.body["offset"], 50);
        assert_eq!(req.body["limit"], 25);
        assert_eq!(req.body["granularity"], "PT30M");
        assert_eq!(req.body["filter"]["dateFilter"]["startDate"], "2024-11-18");
        assert_eq!(req.body["filter"]["dateFilter"]["endDate"], "2024-11-19");
        assert_eq!(req.offset(), Some(50));
    }

    #[test]
    fn test_timestamp_body() {
        let req = request(DateFilterStyle::Timestamps, OffsetPlacement::Query).page_request(&NextPage::default());
        assert_eq!(req.body["startDate"], "2024-11-18 00:00:00");
        assert_eq!(req.body["endDate"], "2024-11-19 23:59:59");
        assert_eq!(req.body["timeZoneOffset"], -330);
    }

    #[test]
    fn test_page_decoding_tolerates_missing_fields() {
        let page = Page::from_slice(br#"{"numResults": 0}"#);
        assert!(page.is_malformed());
        assert_eq!(page.num_results, Some(0));

        let page = Page::from_slice(b"<html>gateway timeout</html>");
        assert!(page.is_malformed());
        assert!(page.has_more.is_none());

        let page = Page::from_slice(
            json!({"data": [{"userId": "a"}, 7], "hasMore": true, "limit": 50})
                .to_string()
                .as_bytes(),
        );
        assert_eq!(page.len(), 1);
        assert_eq!(page.has_more, Some(true));
        assert_eq!(page.limit, Some(50));
    }

    #[test]
    fn test_cursor_placement() {
        let cursor = NextPage::Cursor("cursor-abc".to_string());

        let req = request(DateFilterStyle::SingleDate, OffsetPlacement::Query).page_request(&cursor);
        assert_eq!(req.query, vec![("cursor".to_string(), "cursor-abc".to_string())]);
        assert_eq!(req.cursor(), Some("cursor-abc"));
        assert_eq!(req.offset(), None);

        let req = request(DateFilterStyle::DateSpan, OffsetPlacement::Body).page_request(&cursor);
        assert_eq!(req.body["cursor"], "cursor-abc");
        assert!(req.body.get("offset").is_none());
    }

    #[test]
    fn test_pagination_fields_do_not_discard_records() {
        let page = Page::from_slice(
            json!({"data": [{"userId": "A"}], "hasMore": true, "nextOffset": "cursor-abc"})
                .to_string()
                .as_bytes(),
        );
        assert_eq!(page.len(), 1);
        assert_eq!(page.has_more, Some(true));
        assert_eq!(page.next_page, Some(NextPage::Cursor("cursor-abc".to_string())));

        let page = Page::from_slice(
            json!({
                "data": [{"userId": "A"}, {"userId": "B"}],
                "hasMore": "true",
                "limit": "25",
                "numResults": {"value": 2},
                "nextOffset": 50
            })
            .to_string()
            .as_bytes(),
        );
        assert_eq!(page.len(), 2);
        assert_eq!(page.has_more, Some(true));
        assert_eq!(page.limit, Some(25));
        assert_eq!(page.num_results, None);
        assert_eq!(page.next_page, Some(NextPage::Offset(50)));

        let page = Page::from_slice(br#"{"data": [{"userId": "A"}], "nextOffset": ""}"#);
        assert_eq!(page.len(), 1);
        assert_eq!(page.next_page, None);
    }

    #[test]
    fn test_flat_row_stringifies_nested_values() {
        let mut row = FlatRow::new();
        row.insert("sessionId", json!("s-1"));
        row.insert("dispositions", json!([{"name": "sale"}]));
        row.insert("sessionId", json!("s-2"));

        assert_eq!(row.len(), 2);
        assert_eq!(row.get("sessionId"), Some(&json!("s-2")));
        assert_eq!(
            row.get("dispositions"),
            Some(&json!(r#"[{"name":"sale"}]"#))
        );
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"{"sessionId":"s-2","dispositions":"[{\"name\":\"sale\"}]"}"#
        );
    }
}
