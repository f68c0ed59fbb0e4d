// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each aggregate has its own subdirectory with:
// - Value objects
// - Events
// - Errors
// - Aggregate implementation
// - File-backed repository
//
// This layer is completely separate from the event sourcing infrastructure.
//
// ============================================================================

pub mod authentication;
pub mod conversation;
pub mod personality;
