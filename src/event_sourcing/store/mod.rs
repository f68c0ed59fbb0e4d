// ============================================================================
// Event Sourcing Store - Generic Snapshot Persistence
// ============================================================================
//
// GENERIC persistence infrastructure shared by all file-backed repositories.
// Events are never stored; each repository snapshots current state into one
// document per aggregate type.
//
// ============================================================================

pub mod context;
pub mod error;
pub mod fs;
pub mod snapshot_store;

pub use context::RepositoryContext;
pub use error::RepositoryError;
pub use fs::{FileSystem, TokioFileSystem};
pub use snapshot_store::SnapshotStore;
