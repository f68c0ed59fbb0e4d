// ============================================================================
// Personality Domain - Named AI Personas and Their Aliases
// ============================================================================
//
// This module contains ALL Personality-specific code:
// - Value objects (PersonalityId, Alias, PersonalityProfile, ...)
// - Events (PersonalityCreated, PersonalityAliasAdded, ...)
// - Errors (PersonalityError enum)
// - Aggregate (Personality with business logic)
// - Alias index maintenance
// - Repository (personalities.json)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod errors;
pub mod aggregate;
pub mod alias_index;
pub mod repository;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use errors::*;
pub use aggregate::*;
pub use alias_index::{AliasConflict, AliasIndex};
pub use repository::*;
