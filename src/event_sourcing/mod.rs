// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic, reusable aggregate/event/bus/snapshot infrastructure.
// Domain-specific code is in src/domain/
//
// ============================================================================

pub mod bus;
pub mod core;
pub mod store;

pub use bus::*;
pub use core::*;
pub use store::*;
