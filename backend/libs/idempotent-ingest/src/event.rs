use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use validator::Validate;

use crate::error::{IngestError, IngestResult};

/// Offset-bearing ISO-8601 layouts not covered by RFC 3339.
/// `%z` takes the offset with or without a colon.
const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M%z",
    "%Y%m%dT%H%M%S%z",
];

/// Naive ISO-8601 layouts, read as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y%m%dT%H%M%S",
    "%Y%m%dT%H%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d"];

/// An event submitted by a producer.
///
/// `(topic, event_id)` is the dedup key. Producers may resubmit the same key
/// any number of times; only the first one dequeued is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Event {
    #[validate(length(min = 1, max = 255))]
    pub topic: String,

    #[validate(length(min = 1, max = 255))]
    pub event_id: String,

    /// Producer-side ISO-8601 timestamp, stored verbatim
    pub timestamp: String,

    #[validate(length(min = 1, max = 255))]
    pub source: String,

    #[serde(default = "empty_payload", deserialize_with = "payload_or_empty")]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        topic: impl Into<String>,
        event_id: impl Into<String>,
        timestamp: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let payload = if payload.is_null() {
            empty_payload()
        } else {
            payload
        };
        Self {
            topic: topic.into(),
            event_id: event_id.into(),
            timestamp: timestamp.into(),
            source: source.into(),
            payload,
        }
    }

    /// Field limits, an ISO-8601 check on `timestamp` and an object payload.
    pub fn validate_event(&self) -> IngestResult<()> {
        self.validate()?;
        parse_timestamp(&self.timestamp)?;
        if !self.payload.is_object() {
            return Err(IngestError::InvalidEvent(
                "payload must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    pub fn key(&self) -> DedupKey {
        DedupKey {
            topic: self.topic.clone(),
            event_id: self.event_id.clone(),
        }
    }
}

/// Identity of a logical event across resubmissions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub topic: String,
    pub event_id: String,
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.event_id)
    }
}

/// A persisted event as read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub topic: String,
    pub event_id: String,
    pub timestamp: String,
    pub source: String,
    pub payload: serde_json::Value,

    /// Wall-clock seconds at which the dedup insert committed
    pub processed_at: f64,

    /// Store-assigned commit sequence; breaks `processed_at` ties
    pub seq: i64,
}

/// Parse an ISO-8601 instant. Naive values are read as UTC.
pub fn parse_timestamp(value: &str) -> IngestResult<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(value, format) {
            return Ok(ts.with_timezone(&Utc));
        }
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(ts.and_utc());
        }
    }

    for format in DATE_FORMATS {
        if let Some(ts) = NaiveDate::parse_from_str(value, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
        {
            return Ok(ts.and_utc());
        }
    }

    Err(IngestError::InvalidEvent(format!(
        "timestamp must be ISO-8601, got {:?}",
        value
    )))
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn payload_or_empty<'de, D>(deserializer: D) -> Result<serde_json::Value, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(v) if !v.is_null() => v,
        _ => empty_payload(),
    })
}
