//! Core domain model for the events sync job.

use std::fmt;

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "evsync-core";

/// Default `per_page` sent to the remote events endpoint.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Identifier assigned by the local store when a record is created.
pub type LocalRecordId = Uuid;

/// Stable identifier of an event in the remote system; the join key against local records.
///
/// The upstream emits numeric ids, but the value is treated as opaque and kept in its
/// decimal string form so that `42` and `"42"` refer to the same event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for EventId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Validated event as received from the remote API, before sanitizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub id: EventId,
    pub title: String,
    pub overview: String,
    pub modified: String,
    pub start: String,
    pub end: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    #[default]
    Publish,
}

impl PublicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "publish" => Some(Self::Publish),
            _ => None,
        }
    }
}

/// Metadata stored alongside a local event; `event_id` is the join key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub event_id: EventId,
    pub event_modified: String,
    pub start_date: String,
    pub end_date: String,
    pub event_url: Option<String>,
}

/// Field values written to the store on insert or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub title: String,
    pub body: String,
    pub status: PublicationStatus,
    pub meta: EventMeta,
}

/// Persisted event as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEventRecord {
    pub id: LocalRecordId,
    pub canonical: bool,
    pub record: EventRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which mutation a write performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    Inserted,
    Updated,
}

/// Query options for one request against the remote events endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub per_page: u32,
    pub after: Option<NaiveDate>,
    pub before: Option<NaiveDate>,
    pub page: u32,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PAGE_SIZE,
            after: None,
            before: None,
            page: 1,
        }
    }
}

impl EventFilter {
    /// Filter covering `[today, today + months]`.
    ///
    /// Month arithmetic clamps to the last day of the target month.
    pub fn window(today: NaiveDate, months: u32, per_page: u32) -> Self {
        Self {
            per_page,
            after: Some(today),
            before: Some(today.checked_add_months(Months::new(months)).unwrap_or(NaiveDate::MAX)),
            page: 1,
        }
    }

    pub fn with_page(&self, page: u32) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }

    /// Query pairs in the order the upstream expects them.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);
        if let Some(after) = self.after {
            pairs.push(("after", after.format("%Y-%m-%d").to_string()));
        }
        if let Some(before) = self.before {
            pairs.push(("before", before.format("%Y-%m-%d").to_string()));
        }
        pairs.push(("per_page", self.per_page.to_string()));
        if self.page > 1 {
            pairs.push(("page", self.page.to_string()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn numeric_and_string_ids_compare_equal() {
        assert_eq!(EventId::from(42u64), EventId::from("42"));
        let parsed: EventId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(parsed.to_string(), "42");
    }

    #[test]
    fn window_clamps_to_end_of_month() {
        let filter = EventFilter::window(date(2024, 11, 30), 3, 100);
        assert_eq!(filter.after, Some(date(2024, 11, 30)));
        assert_eq!(filter.before, Some(date(2025, 2, 28)));
    }

    #[test]
    fn query_pairs_omit_first_page_and_missing_bounds() {
        let pairs = EventFilter::default().query_pairs();
        assert_eq!(pairs, vec![("per_page", "100".to_string())]);

        let pairs = EventFilter::window(date(2024, 9, 1), 3, 50).with_page(2).query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("after", "2024-09-01".to_string()),
                ("before", "2024-12-01".to_string()),
                ("per_page", "50".to_string()),
                ("page", "2".to_string()),
            ]
        );
    }

    #[test]
    fn publication_status_round_trips_through_str() {
        assert_eq!(PublicationStatus::parse("publish"), Some(PublicationStatus::Publish));
        assert_eq!(PublicationStatus::Publish.as_str(), "publish");
        assert_eq!(PublicationStatus::parse("trash"), None);
    }
}
