use anyhow::Result;
use chrono::{DateTime, Utc};
use super::event::{DomainEvent, EventEnvelope, EventRecord};

// ============================================================================
// Aggregate Root Pattern - Event-Applied State, Snapshot Persistence
// ============================================================================
//
// Key Principles:
// 1. Commands validate invariants before any event is applied
// 2. Fields change only inside `when`, one match arm per event type
// 3. Every applied event bumps the version by exactly one and is buffered
// 4. The buffer is drained once the repository has persisted a snapshot
// 5. Hydration from a snapshot is field population, not replay
//
// ============================================================================

/// Identity, version and pending events shared by every aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct RootState<E> {
    id: String,
    version: u64,
    uncommitted_events: Vec<EventEnvelope<E>>,
}

impl<E> RootState<E> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            uncommitted_events: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Used by hydration only; versions never move backwards otherwise
    pub(crate) fn restore_version(&mut self, version: u64) {
        self.version = self.version.max(version);
    }

    fn record(&mut self, envelope: EventEnvelope<E>) {
        self.version += 1;
        self.uncommitted_events.push(envelope);
    }
}

/// Generic aggregate trait - all event-applied aggregates implement this
///
/// Type Parameters:
/// - `Event`: The domain event union for this aggregate
/// - `Error`: The error type for business rule violations
pub trait AggregateRoot: Sized + Send + Sync {
    type Event: DomainEvent;
    type Error;

    fn root(&self) -> &RootState<Self::Event>;

    fn root_mut(&mut self) -> &mut RootState<Self::Event>;

    /// Event handler dispatch: mutate fields for one event
    fn when(&mut self, event: &Self::Event);

    fn aggregate_id(&self) -> &str {
        self.root().id()
    }

    fn version(&self) -> u64 {
        self.root().version()
    }

    /// Apply an already-validated event: handler, version bump, buffer
    fn apply_event(&mut self, envelope: EventEnvelope<Self::Event>) {
        self.when(&envelope.payload);
        self.root_mut().record(envelope);
    }

    /// Build an envelope for this aggregate and apply it
    fn raise(&mut self, event: Self::Event, at: DateTime<Utc>) {
        let envelope = EventEnvelope::new(self.aggregate_id().to_string(), event, at);
        self.apply_event(envelope);
    }

    /// Apply an untyped record. Unknown event types are skipped so that
    /// records from newer writers do not break older readers.
    fn apply_record(&mut self, record: &EventRecord) -> Result<bool> {
        if !Self::Event::is_known_type(&record.event_type) {
            tracing::debug!(
                aggregate_id = %self.aggregate_id(),
                event_type = %record.event_type,
                "Skipping unknown event type"
            );
            return Ok(false);
        }

        let envelope = EventEnvelope::<Self::Event>::from_record(record)?;
        self.apply_event(envelope);
        Ok(true)
    }

    fn uncommitted_events(&self) -> &[EventEnvelope<Self::Event>] {
        &self.root().uncommitted_events
    }

    /// Drain the pending buffer, returning what was pending
    fn mark_events_as_committed(&mut self) -> Vec<EventEnvelope<Self::Event>> {
        std::mem::take(&mut self.root_mut().uncommitted_events)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
