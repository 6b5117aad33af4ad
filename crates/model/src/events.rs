//! Lifecycle events recorded on blueprints and outputs.
//!
//! Events arrive from worker pipelines as loosely typed JSON. [`EventRequest`]
//! captures that raw shape and [`EventRequest::validate`] turns it into a
//! typed [`Event`], rejecting unknown types and zero timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Enumerated lifecycle markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    FilterOutputCreated,
    FilterOutputQueryStart,
    FilterOutputQueryEnd,
    #[serde(rename = "FilterOutputCSVGenStart")]
    FilterOutputCsvGenStart,
    #[serde(rename = "FilterOutputCSVGenEnd")]
    FilterOutputCsvGenEnd,
    #[serde(rename = "FilterOutputXLSXGenStart")]
    FilterOutputXlsxGenStart,
    #[serde(rename = "FilterOutputXLSXGenEnd")]
    FilterOutputXlsxGenEnd,
    FilterOutputCompleted,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::FilterOutputCreated,
        EventType::FilterOutputQueryStart,
        EventType::FilterOutputQueryEnd,
        EventType::FilterOutputCsvGenStart,
        EventType::FilterOutputCsvGenEnd,
        EventType::FilterOutputXlsxGenStart,
        EventType::FilterOutputXlsxGenEnd,
        EventType::FilterOutputCompleted,
    ];

    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FilterOutputCreated => "FilterOutputCreated",
            EventType::FilterOutputQueryStart => "FilterOutputQueryStart",
            EventType::FilterOutputQueryEnd => "FilterOutputQueryEnd",
            EventType::FilterOutputCsvGenStart => "FilterOutputCSVGenStart",
            EventType::FilterOutputCsvGenEnd => "FilterOutputCSVGenEnd",
            EventType::FilterOutputXlsxGenStart => "FilterOutputXLSXGenStart",
            EventType::FilterOutputXlsxGenEnd => "FilterOutputXLSXGenEnd",
            EventType::FilterOutputCompleted => "FilterOutputCompleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub time: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventType, time: DateTime<Utc>) -> Self {
        Self { kind, time }
    }
}

/// Reasons an incoming event is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("event type is missing")]
    MissingType,

    #[error("event type '{0}' is not a recognised filter output event")]
    UnknownType(String),

    #[error("event time is missing or zero")]
    MissingTime,
}

/// Event as submitted by a client, before validation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EventRequest {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

impl EventRequest {
    pub fn validate(&self) -> Result<Event, EventError> {
        let kind = match self.kind.as_deref() {
            None | Some("") => return Err(EventError::MissingType),
            Some(raw) => EventType::parse(raw).ok_or_else(|| EventError::UnknownType(raw.into()))?,
        };
        let time = self.time.filter(|t| !is_zero_time(t)).ok_or(EventError::MissingTime)?;
        Ok(Event::new(kind, time))
    }
}

/// Zero timestamps are the Unix epoch or anything before year one.
fn is_zero_time(time: &DateTime<Utc>) -> bool {
    (time.timestamp() == 0 && time.timestamp_subsec_nanos() == 0)
        || time.timestamp() <= ZERO_YEAR_ONE_SECS
}

/// `0001-01-01T00:00:00Z` in Unix seconds.
const ZERO_YEAR_ONE_SECS: i64 = -62_135_596_800;

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: Option<&str>, time: Option<&str>) -> EventRequest {
        EventRequest {
            kind: kind.map(str::to_string),
            time: time.map(|t| t.parse().unwrap()),
        }
    }

    #[test]
    fn wire_names_roundtrip() {
        for kind in EventType::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(EventType::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn valid_event_passes() {
        let event = request(Some("FilterOutputCSVGenEnd"), Some("2024-03-01T10:00:00Z"))
            .validate()
            .unwrap();
        assert_eq!(event.kind, EventType::FilterOutputCsvGenEnd);
    }

    #[test]
    fn unknown_type_rejected() {
        let err = request(Some("Bogus"), Some("2024-03-01T10:00:00Z"))
            .validate()
            .unwrap_err();
        assert_eq!(err, EventError::UnknownType("Bogus".into()));
        assert_eq!(
            request(None, Some("2024-03-01T10:00:00Z")).validate(),
            Err(EventError::MissingType)
        );
    }

    #[test]
    fn zero_time_rejected() {
        assert_eq!(
            request(Some("FilterOutputCompleted"), None).validate(),
            Err(EventError::MissingTime)
        );
        assert_eq!(
            request(Some("FilterOutputCompleted"), Some("1970-01-01T00:00:00Z")).validate(),
            Err(EventError::MissingTime)
        );
        assert_eq!(
            request(Some("FilterOutputCompleted"), Some("0001-01-01T00:00:00Z")).validate(),
            Err(EventError::MissingTime)
        );
    }
}
