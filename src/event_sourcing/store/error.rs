use std::path::PathBuf;

// ============================================================================
// Repository Errors
// ============================================================================
//
// Storage-side taxonomy. Aggregate rule violations have their own enums in
// each domain module; index conflicts are never errors (warn and skip).
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// A stored record is missing fields required to rebuild the aggregate.
    /// The record itself is left untouched.
    #[error("Cannot hydrate {aggregate} {id}: {reason}")]
    Hydration {
        aggregate: &'static str,
        id: String,
        reason: String,
    },

    #[error("{operation} failed for {}: {source}", .path.display())]
    Persistence {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed document {}: {source}", .path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Migration of {format} data failed: {reason}")]
    Migration {
        format: &'static str,
        reason: String,
    },

    #[error("{aggregate} not found: {id}")]
    NotFound {
        aggregate: &'static str,
        id: String,
    },
}

impl RepositoryError {
    pub fn hydration(aggregate: &'static str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Hydration {
            aggregate,
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn persistence(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            operation,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_error_mentions_path_and_operation() {
        let error = RepositoryError::persistence(
            "rename",
            "/data/personalities.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );

        let message = error.to_string();
        assert!(message.contains("rename"));
        assert!(message.contains("/data/personalities.json"));
        assert!(message.contains("denied"));
    }

    #[test]
    fn test_hydration_error_message() {
        let error = RepositoryError::hydration("personality", "aria", "missing owner id");
        assert_eq!(error.to_string(), "Cannot hydrate personality aria: missing owner id");
    }
}
