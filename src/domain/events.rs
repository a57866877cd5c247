//! Event types for the instance flow log.
//!
//! Every stage of an integration pipeline emits an event. Events are immutable
//! facts appended to a log keyed by the instance's [`AggregateKey`]; the current
//! state of an instance is always derived from them, never stored directly.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Store-assigned event identifier. Ids grow in insertion order.
pub type EventId = i64;

/// Sub-second digits kept for event timestamps
pub const TIMESTAMP_PRECISION: u16 = 6;

/// Truncate an instant to the precision every event log stores
pub fn log_precision(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(TIMESTAMP_PRECISION)
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    DateTime::<Utc>::deserialize(deserializer).map(log_precision)
}

/// Stable identity of one instance across its lifecycle.
///
/// Ordering is lexicographic over (source application, integration, instance)
/// and is used as the tie-break for stable pagination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateKey {
    pub source_application_id: i64,
    pub source_application_integration_id: String,
    pub source_application_instance_id: String,
}

impl AggregateKey {
    pub fn new(
        source_application_id: i64,
        source_application_integration_id: impl Into<String>,
        source_application_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            source_application_id,
            source_application_integration_id: source_application_integration_id.into(),
            source_application_instance_id: source_application_instance_id.into(),
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.source_application_id,
            self.source_application_integration_id,
            self.source_application_instance_id
        )
    }
}

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Info,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Error => "ERROR",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Self::Info),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}

/// A single error reported by a pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub error_code: String,

    #[serde(default)]
    pub args: HashMap<String, String>,
}

impl ErrorEntry {
    pub fn new(error_code: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            args: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Correlation data carried along the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowHeaders {
    pub correlation_id: Option<Uuid>,

    pub integration_id: Option<i64>,

    /// Numeric id of the instance inside the pipeline
    pub instance_id: Option<i64>,

    pub configuration_id: Option<i64>,

    pub archive_instance_id: Option<String>,

    #[serde(default)]
    pub file_ids: Vec<Uuid>,

    /// Set by dispatch stages once the destination has accepted the instance
    pub destination_instance_id: Option<String>,
}

/// A lifecycle event as produced by a pipeline stage.
///
/// The event carries no id until the log assigns one on append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(flatten)]
    pub key: AggregateKey,

    /// Event name, resolved against the category catalog
    pub name: String,

    /// Microsecond precision, see [`log_precision`]
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,

    pub kind: EventKind,

    /// Component that emitted the event
    pub application_id: String,

    #[serde(default)]
    pub errors: Vec<ErrorEntry>,

    #[serde(default)]
    pub flow_headers: FlowHeaders,
}

impl Event {
    /// Create a new event stamped with the current time
    pub fn new(
        key: AggregateKey,
        name: impl Into<String>,
        kind: EventKind,
        application_id: impl Into<String>,
    ) -> Self {
        Self {
            key,
            name: name.into(),
            timestamp: log_precision(Utc::now()),
            kind,
            application_id: application_id.into(),
            errors: Vec::new(),
            flow_headers: FlowHeaders::default(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = log_precision(timestamp);
        self
    }

    pub fn with_headers(mut self, flow_headers: FlowHeaders) -> Self {
        self.flow_headers = flow_headers;
        self
    }

    pub fn with_error(mut self, error: ErrorEntry) -> Self {
        self.errors.push(error);
        self
    }

    pub fn with_destination(mut self, destination_instance_id: impl Into<String>) -> Self {
        self.flow_headers.destination_instance_id = Some(destination_instance_id.into());
        self
    }
}

/// An event as read back from the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: EventId,

    #[serde(flatten)]
    pub event: Event,
}

impl StoredEvent {
    /// Log position used for "latest" comparisons: timestamp first, id as tie-break
    pub fn position(&self) -> (DateTime<Utc>, EventId) {
        (self.event.timestamp, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_uses_flat_key() {
        let event = Event::new(
            AggregateKey::new(1, "INT-1", "abc"),
            "instance-received",
            EventKind::Info,
            "fint-flyt-gateway",
        )
        .with_error(ErrorEntry::new("no-mapping").with_arg("field", "title"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sourceApplicationId"], 1);
        assert_eq!(json["sourceApplicationIntegrationId"], "INT-1");
        assert_eq!(json["kind"], "INFO");
        assert_eq!(json["errors"][0]["args"]["field"], "title");

        let parsed: Event = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_defaults_missing_headers() {
        let json = r#"{
            "sourceApplicationId": 2,
            "sourceApplicationIntegrationId": "x",
            "sourceApplicationInstanceId": "y",
            "name": "instance-mapped",
            "timestamp": "2024-03-01T10:00:00Z",
            "kind": "INFO",
            "applicationId": "mapper"
        }"#;

        let parsed: Event = serde_json::from_str(json).unwrap();
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.flow_headers, FlowHeaders::default());
    }

    #[test]
    fn test_timestamps_keep_microseconds() {
        let key = AggregateKey::new(1, "i", "x");
        let at: DateTime<Utc> = "2024-03-01T10:00:00.123456789Z".parse().unwrap();
        let event = Event::new(key, "instance-mapped", EventKind::Info, "m").at(at);
        assert_eq!(event.timestamp.timestamp_subsec_nanos(), 123_456_000);

        let json = r#"{
            "sourceApplicationId": 1,
            "sourceApplicationIntegrationId": "i",
            "sourceApplicationInstanceId": "x",
            "name": "instance-mapped",
            "timestamp": "2024-03-01T10:00:00.999999999Z",
            "kind": "INFO",
            "applicationId": "m"
        }"#;
        let parsed: Event = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.timestamp.timestamp_subsec_nanos(), 999_999_000);
    }

    #[test]
    fn test_aggregate_key_ordering() {
        let a = AggregateKey::new(1, "b", "z");
        let b = AggregateKey::new(1, "c", "a");
        let c = AggregateKey::new(2, "a", "a");
        assert!(a < b && b < c);
        assert_eq!(a.to_string(), "1/b/z");
    }

    #[test]
    fn test_position_tie_break_uses_id() {
        let at = Utc::now();
        let event = Event::new(AggregateKey::new(1, "i", "x"), "instance-mapped", EventKind::Info, "m").at(at);
        let first = StoredEvent { id: 4, event: event.clone() };
        let second = StoredEvent { id: 5, event };
        assert!(second.position() > first.position());
    }
}
