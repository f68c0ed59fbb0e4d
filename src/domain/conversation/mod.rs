// ============================================================================
// Conversation Domain - Per-User, Per-Channel Chat State
// ============================================================================
//
// - Value objects (ConversationId, Message, ConversationSettings, ...)
// - Events (ConversationStarted, MessageAdded, ConversationEnded, ...)
// - Errors (ConversationError enum)
// - Aggregate (Conversation, with derived timeout and auto-response trigger)
// - Repository (conversations.json, incl. channel activations)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod errors;
pub mod aggregate;
pub mod repository;

pub use value_objects::*;
pub use events::*;
pub use errors::*;
pub use aggregate::*;
pub use repository::*;
