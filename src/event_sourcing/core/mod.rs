// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// GENERIC building blocks shared by every aggregate:
// - No domain-specific code (no Personality, Conversation, ...)
// - Commands validate, events mutate, repositories snapshot
//
// ============================================================================

pub mod aggregate;
pub mod event;

pub use aggregate::{AggregateRoot, RootState};
pub use event::{generate_event_id, DomainEvent, EventEnvelope, EventRecord};
