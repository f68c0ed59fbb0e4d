use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use anyhow::{Context, Result};

// ============================================================================
// Event Envelope - One Immutable Fact About One Aggregate
// ============================================================================
//
// Wraps a typed domain event with identity and timing. Envelopes live only in
// memory (the aggregate's uncommitted buffer) and on the event bus; durable
// storage is a snapshot of aggregate state, never the envelopes themselves.
//
// ============================================================================

/// Typed event envelope
///
/// Type Parameter:
/// - `E`: The domain event type (must implement DomainEvent trait)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<E> {
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: E,
    pub occurred_at: DateTime<Utc>,
}

impl<E: DomainEvent> EventEnvelope<E> {
    pub fn new(aggregate_id: impl Into<String>, payload: E, occurred_at: DateTime<Utc>) -> Self {
        let aggregate_id = aggregate_id.into();
        let event_type = payload.event_type();

        Self {
            event_id: generate_event_id(event_type, &aggregate_id, occurred_at),
            event_type: event_type.to_string(),
            aggregate_id,
            payload,
            occurred_at,
        }
    }

    /// Untyped transport form for the event bus
    pub fn to_record(&self) -> Result<EventRecord> {
        let tagged = serde_json::to_value(&self.payload)
            .with_context(|| format!("failed to encode {} payload", self.event_type))?;

        // Events are adjacently tagged ({"type", "data"}); the record keeps
        // the tag in event_type and only the data as payload.
        let payload = match tagged {
            Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
            other => other,
        };

        Ok(EventRecord {
            event_id: self.event_id.clone(),
            event_type: self.event_type.clone(),
            aggregate_id: self.aggregate_id.clone(),
            payload,
            occurred_at: self.occurred_at,
        })
    }

    /// Rebuild a typed envelope from its transport form
    pub fn from_record(record: &EventRecord) -> Result<Self> {
        let tagged = serde_json::json!({
            "type": record.event_type,
            "data": record.payload,
        });
        let payload: E = serde_json::from_value(tagged)
            .with_context(|| format!("failed to decode {} payload", record.event_type))?;

        Ok(Self {
            event_id: record.event_id.clone(),
            event_type: record.event_type.clone(),
            aggregate_id: record.aggregate_id.clone(),
            payload,
            occurred_at: record.occurred_at,
        })
    }
}

/// Structured, type-erased event record used on the event bus
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Implemented by each aggregate's event union.
///
/// The union must be serde-tagged as `{"type": <event_type>, "data": {...}}`
/// so envelopes can round-trip through `EventRecord`.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Every event type this union can decode
    const EVENT_TYPES: &'static [&'static str];

    fn event_type(&self) -> &'static str;

    fn is_known_type(event_type: &str) -> bool {
        Self::EVENT_TYPES.contains(&event_type)
    }
}

/// `<type>-<aggregate>-<millis>-<salt>`
pub fn generate_event_id(event_type: &str, aggregate_id: &str, at: DateTime<Utc>) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}-{}", event_type, aggregate_id, at.timestamp_millis(), &salt[..8])
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[serde(tag = "type", content = "data")]
    enum TestEvent {
        Renamed(Renamed),
    }

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Renamed {
        name: String,
    }

    impl DomainEvent for TestEvent {
        const EVENT_TYPES: &'static [&'static str] = &["Renamed"];

        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Renamed(_) => "Renamed",
            }
        }
    }

    #[test]
    fn test_event_envelope_creation() {
        let now = Utc::now();
        let envelope = EventEnvelope::new(
            "agg-1",
            TestEvent::Renamed(Renamed { name: "x".to_string() }),
            now,
        );

        assert_eq!(envelope.aggregate_id, "agg-1");
        assert_eq!(envelope.event_type, "Renamed");
        assert_eq!(envelope.occurred_at, now);
        assert!(envelope.event_id.starts_with(&format!("Renamed-agg-1-{}-", now.timestamp_millis())));
    }

    #[test]
    fn test_event_ids_are_unique_for_same_instant() {
        let now = Utc::now();
        let a = generate_event_id("Renamed", "agg-1", now);
        let b = generate_event_id("Renamed", "agg-1", now);
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_round_trip_is_lossless() {
        let envelope = EventEnvelope::new(
            "agg-2",
            TestEvent::Renamed(Renamed { name: "persona".to_string() }),
            Utc::now(),
        );

        let record = envelope.to_record().unwrap();
        assert_eq!(record.payload, serde_json::json!({ "name": "persona" }));

        let back: EventEnvelope<TestEvent> = EventEnvelope::from_record(&record).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_known_types() {
        assert!(TestEvent::is_known_type("Renamed"));
        assert!(!TestEvent::is_known_type("Deleted"));
    }
}
