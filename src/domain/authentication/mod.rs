// ============================================================================
// Authentication Domain - Vendor Tokens and NSFW Verification
// ============================================================================
//
// - Value objects (Token, NsfwStatus)
// - Events (UserAuthCreated, TokenAssigned, TokenRevoked, NsfwVerified)
// - Errors (AuthError enum)
// - Aggregate (UserAuth)
// - Repository (auth.json, migrates the legacy token formats on load)
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
