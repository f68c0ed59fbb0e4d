// ============================================================================
// Migration - One-Shot Rewrites of Legacy On-Disk Formats
// ============================================================================
//
// Run during repository initialisation. A migrated source is renamed (or, when
// the source is the live document, copied) to "<name>.migrated" so it is
// never picked up again.
//
// ============================================================================

pub mod legacy;
pub mod token_policy;

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::event_sourcing::store::{FileSystem, RepositoryError};

pub use legacy::{
    detect_format, migrate_flat, migrate_nested, AuthDocumentFormat, LegacyNestedDocument,
    LegacyTokenEntry, LegacyVerification, FLAT_FORMAT, NESTED_FORMAT,
};
pub use token_policy::{select_token, TokenCandidate};

pub const MIGRATED_SUFFIX: &str = ".migrated";

/// `auth.json` -> `auth.json.migrated`
pub fn migrated_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(MIGRATED_SUFFIX);
    PathBuf::from(name)
}

/// Read and parse a legacy JSON file; `Ok(None)` when it does not exist
pub async fn read_legacy<T: DeserializeOwned>(
    fs: &dyn FileSystem,
    path: &Path,
    format: &'static str,
) -> Result<Option<T>, RepositoryError> {
    let Some(bytes) = fs
        .read(path)
        .await
        .map_err(|e| RepositoryError::persistence("read", path, e))?
    else {
        return Ok(None);
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| RepositoryError::Migration {
            format,
            reason: format!("{}: {}", path.display(), e),
        })
}

/// Rename a fully migrated source out of the way
pub async fn retire_source(fs: &dyn FileSystem, path: &Path) -> Result<PathBuf, RepositoryError> {
    let target = migrated_path(path);
    fs.rename(path, &target)
        .await
        .map_err(|e| RepositoryError::persistence("rename", path, e))?;

    tracing::info!(
        from = %path.display(),
        to = %target.display(),
        "Legacy source retired"
    );
    Ok(target)
}
