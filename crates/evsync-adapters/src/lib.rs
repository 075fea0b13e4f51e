//! Remote events API adapter: request building, page decoding, per-record validation and
//! text sanitizing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evsync_core::{EventFilter, EventId, RemoteEvent};
use evsync_storage::{FetchError, HttpFetcher};
use scraper::Html;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "evsync-adapters";

/// Response header carrying the upstream page count.
pub const TOTAL_PAGES_HEADER: &str = "x-wp-totalpages";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// One decoded response page; each record is validated on its own.
#[derive(Debug, Clone)]
pub struct EventPage {
    pub page: u32,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub total_pages: Option<u32>,
    pub records: Vec<Result<RemoteEvent, ValidationError>>,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchedEvents {
    pub pages: Vec<EventPage>,
    pub total_pages: Option<u32>,
}

impl FetchedEvents {
    pub fn record_count(&self) -> usize {
        self.pages.iter().map(|p| p.records.len()).sum()
    }
}

#[async_trait]
pub trait EventSource: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn fetch_page(&self, filter: &EventFilter) -> Result<EventPage, FetchError>;

    /// Fetch `filter` starting at page 1, following the upstream page count up to `max_pages`.
    ///
    /// Any page failing aborts the whole fetch.
    async fn fetch_events(
        &self,
        filter: &EventFilter,
        max_pages: u32,
    ) -> Result<FetchedEvents, FetchError> {
        let first = self.fetch_page(&filter.with_page(1)).await?;
        let total_pages = first.total_pages;
        let limit = max_pages.max(1).min(total_pages.unwrap_or(1).max(1));

        let mut pages = vec![first];
        for page in 2..=limit {
            pages.push(self.fetch_page(&filter.with_page(page)).await?);
        }

        if let Some(total) = total_pages {
            if total > limit {
                warn!(
                    endpoint = self.endpoint(),
                    fetched_pages = limit,
                    total_pages = total,
                    "upstream has more pages than this sweep fetches"
                );
            }
        }

        Ok(FetchedEvents { pages, total_pages })
    }
}

/// WordPress REST `event` endpoint.
#[derive(Debug)]
pub struct EventsApi {
    endpoint: String,
    http: HttpFetcher,
}

impl EventsApi {
    pub fn new(endpoint: impl Into<String>, http: HttpFetcher) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }
}

#[async_trait]
impl EventSource for EventsApi {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch_page(&self, filter: &EventFilter) -> Result<EventPage, FetchError> {
        let response = self.http.get(&self.endpoint, &filter.query_pairs()).await?;
        let records = decode_page(&response.body, &response.final_url)?;
        Ok(EventPage {
            page: filter.page,
            total_pages: response.header_u32(TOTAL_PAGES_HEADER),
            url: response.final_url,
            fetched_at: response.fetched_at,
            records,
            raw: response.body,
        })
    }
}

/// Decode a response body that must be a JSON array of event objects.
pub fn decode_page(
    body: &[u8],
    url: &str,
) -> Result<Vec<Result<RemoteEvent, ValidationError>>, FetchError> {
    let value: JsonValue = serde_json::from_slice(body).map_err(|e| FetchError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    let JsonValue::Array(items) = value else {
        return Err(FetchError::Decode {
            url: url.to_string(),
            reason: "expected a JSON array of events".to_string(),
        });
    };
    Ok(items.iter().map(parse_remote_event).collect())
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn required_str(
    value: &JsonValue,
    path: &[&str],
    field: &'static str,
) -> Result<String, ValidationError> {
    match json_at(value, path) {
        None | Some(JsonValue::Null) => Err(ValidationError::MissingField(field)),
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::InvalidField {
            field,
            expected: "a string",
        }),
    }
}

fn parse_event_id(value: &JsonValue) -> Result<EventId, ValidationError> {
    match value.get("id") {
        None | Some(JsonValue::Null) => Err(ValidationError::MissingField("id")),
        Some(JsonValue::Number(n)) => match n.as_u64() {
            Some(id) => Ok(EventId::from(id)),
            None => Err(ValidationError::InvalidField {
                field: "id",
                expected: "a non-negative integer or string",
            }),
        },
        Some(JsonValue::String(s)) if !s.trim().is_empty() => Ok(EventId::new(s.trim())),
        Some(_) => Err(ValidationError::InvalidField {
            field: "id",
            expected: "a non-negative integer or string",
        }),
    }
}

/// Validate one element of the response array.
///
/// ACF reports an empty WYSIWYG field as `false` or `null`; the overview treats both as empty
/// text. Dates and the title are required.
pub fn parse_remote_event(value: &JsonValue) -> Result<RemoteEvent, ValidationError> {
    if !value.is_object() {
        return Err(ValidationError::NotAnObject);
    }
    let id = parse_event_id(value)?;
    let title = required_str(value, &["title", "rendered"], "title.rendered")?;
    let modified = required_str(value, &["modified"], "modified")?;

    let overview = match json_at(value, &["acf", "overview"]) {
        None => return Err(ValidationError::MissingField("acf.overview")),
        Some(JsonValue::Null) | Some(JsonValue::Bool(false)) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(_) => {
            return Err(ValidationError::InvalidField {
                field: "acf.overview",
                expected: "a string",
            })
        }
    };
    let start = required_str(value, &["acf", "start"], "acf.start")?;
    let end = required_str(value, &["acf", "end"], "acf.end")?;
    let link = value
        .get("link")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    Ok(RemoteEvent {
        id,
        title,
        overview,
        modified,
        start,
        end,
        link,
    })
}

/// Text content of an HTML fragment with entities decoded; script and style bodies dropped.
fn strip_markup(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    let mut out = String::with_capacity(input.len());
    for node in fragment.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| matches!(e.name(), "script" | "style")))
            .unwrap_or(false);
        if !hidden {
            out.push_str(text);
        }
    }
    out
}

/// Single-line plain text: markup removed, whitespace runs collapsed, trimmed.
pub fn sanitize_text_field(input: &str) -> String {
    strip_markup(input)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Multi-line plain text: markup removed, line breaks kept, trailing blanks trimmed.
pub fn sanitize_textarea_field(input: &str) -> String {
    let text = strip_markup(input).replace("\r\n", "\n").replace('\r', "\n");
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn festival() -> JsonValue {
        json!({
            "id": 42,
            "modified": "2024-08-01T10:00:00",
            "link": "https://downtownsiouxcity.com/event/fall-festival/",
            "title": { "rendered": "Fall Festival" },
            "acf": {
                "overview": "Fun for all",
                "start": "2024-09-01",
                "end": "2024-09-03"
            }
        })
    }

    #[test]
    fn parses_a_complete_record() {
        let event = parse_remote_event(&festival()).unwrap();
        assert_eq!(event.id, EventId::from(42u64));
        assert_eq!(event.title, "Fall Festival");
        assert_eq!(event.overview, "Fun for all");
        assert_eq!(event.modified, "2024-08-01T10:00:00");
        assert_eq!(event.start, "2024-09-01");
        assert_eq!(event.end, "2024-09-03");
        assert_eq!(
            event.link.as_deref(),
            Some("https://downtownsiouxcity.com/event/fall-festival/")
        );
    }

    #[test]
    fn string_ids_are_accepted() {
        let mut value = festival();
        value["id"] = json!("evt-42");
        assert_eq!(parse_remote_event(&value).unwrap().id.as_str(), "evt-42");
    }

    #[test]
    fn missing_nested_fields_are_reported_by_path() {
        let mut value = festival();
        value["acf"] = json!([]);
        assert_eq!(
            parse_remote_event(&value),
            Err(ValidationError::MissingField("acf.overview"))
        );

        let mut value = festival();
        value["acf"].as_object_mut().unwrap().remove("start");
        assert_eq!(
            parse_remote_event(&value),
            Err(ValidationError::MissingField("acf.start"))
        );

        let mut value = festival();
        value["title"] = json!("Fall Festival");
        assert_eq!(
            parse_remote_event(&value),
            Err(ValidationError::MissingField("title.rendered"))
        );
    }

    #[test]
    fn ill_typed_fields_are_invalid() {
        let mut value = festival();
        value["acf"]["end"] = json!(20240903);
        assert_eq!(
            parse_remote_event(&value),
            Err(ValidationError::InvalidField {
                field: "acf.end",
                expected: "a string"
            })
        );
        assert_eq!(parse_remote_event(&json!(42)), Err(ValidationError::NotAnObject));
    }

    #[test]
    fn empty_acf_overview_becomes_empty_text() {
        let mut value = festival();
        value["acf"]["overview"] = json!(false);
        assert_eq!(parse_remote_event(&value).unwrap().overview, "");
    }

    #[test]
    fn decode_page_isolates_bad_records() {
        let body = br#"[{"id":1},{"id":2,"modified":"m","title":{"rendered":"t"},"acf":{"overview":"o","start":"s","end":"e"}}]"#;
        let records = decode_page(body, "http://test/events").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_err());
        assert_eq!(records[1].as_ref().unwrap().id.as_str(), "2");
    }

    #[test]
    fn decode_page_rejects_non_arrays() {
        let err = decode_page(br#"{"code":"rest_no_route"}"#, "http://test/events").unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
        assert_eq!(err.kind(), "decode");

        let err = decode_page(b"<html>", "http://test/events").unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));

        assert!(decode_page(b"[]", "http://test/events").unwrap().is_empty());
    }

    #[test]
    fn text_field_strips_tags_and_decodes_entities() {
        assert_eq!(
            sanitize_text_field("  Jazz &amp; Blues <em>Night</em>\n"),
            "Jazz & Blues Night"
        );
        assert_eq!(sanitize_text_field("Fall Festival"), "Fall Festival");
        assert_eq!(
            sanitize_text_field("Safe<script>alert(1)</script> Title"),
            "Safe Title"
        );
    }

    #[test]
    fn textarea_field_keeps_line_breaks() {
        assert_eq!(
            sanitize_textarea_field("<p>Live music.</p>\r\n<p>Bring a chair.  </p>\n"),
            "Live music.\nBring a chair."
        );
        assert_eq!(sanitize_textarea_field("Fun for all"), "Fun for all");
    }
}
