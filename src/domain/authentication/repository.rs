use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::aggregate::UserAuth;
use super::value_objects::{NsfwStatus, Token};
use crate::domain::personality::UserId;
use crate::event_sourcing::core::AggregateRoot;
use crate::event_sourcing::store::{RepositoryContext, RepositoryError, SnapshotStore};
use crate::migration::{self, AuthDocumentFormat, LegacyNestedDocument, LegacyTokenEntry, LegacyVerification};
use crate::utils::ManualClock;

// ============================================================================
// Authentication Repository - auth.json
// ============================================================================
//
// Initialisation order:
// 1. auth.json in the nested legacy shape is collapsed to one token per user;
//    the original bytes are kept at auth.json.migrated
// 2. auth_tokens.json / nsfw_verified.json (flat legacy files) are merged in
//    for users not already present, then renamed to *.migrated
//
// ============================================================================

pub const AUTH_FILE: &str = "auth.json";
pub const LEGACY_TOKENS_FILE: &str = "auth_tokens.json";
pub const LEGACY_NSFW_FILE: &str = "nsfw_verified.json";

const AGGREGATE: &str = "user_auth";
const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDocument {
    #[serde(default)]
    pub users: BTreeMap<String, UserAuthRecord>,
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAuthRecord {
    pub user_id: String,
    #[serde(default)]
    pub token: Option<Token>,
    #[serde(default)]
    pub nsfw_status: NsfwStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl UserAuthRecord {
    pub fn from_aggregate(auth: &UserAuth) -> Self {
        Self {
            user_id: auth.aggregate_id().to_string(),
            token: auth.token().cloned(),
            nsfw_status: auth.nsfw_status().clone(),
            created_at: Some(auth.created_at()),
            updated_at: Some(auth.updated_at()),
            version: auth.version(),
        }
    }
}

/// `now` stands in for a creation time the record never carried
fn hydrate(record: &UserAuthRecord, now: DateTime<Utc>) -> Result<UserAuth, RepositoryError> {
    let created_at = record.created_at.or(record.updated_at).unwrap_or(now);

    let mut auth = UserAuth::create(UserId::new(&record.user_id), &ManualClock::new(created_at))
        .map_err(|e| RepositoryError::hydration(AGGREGATE, &record.user_id, e.to_string()))?;

    auth.token = record.token.clone();
    auth.nsfw_status = record.nsfw_status.clone();
    auth.updated_at = record.updated_at.unwrap_or(created_at);
    auth.root.restore_version(record.version);
    auth.mark_events_as_committed();

    Ok(auth)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStats {
    pub users: usize,
    pub with_token: usize,
    pub valid_tokens: usize,
    pub nsfw_verified: usize,
}

pub struct AuthRepository {
    data_dir: PathBuf,
    store: SnapshotStore<AuthDocument>,
    context: RepositoryContext,
}

impl AuthRepository {
    pub fn new(data_dir: impl AsRef<Path>, context: RepositoryContext) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        let store = context.snapshot_store(AGGREGATE, data_dir.join(AUTH_FILE));
        Self { data_dir, store, context }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub async fn initialize(&self) -> Result<(), RepositoryError> {
        self.store
            .initialize_with(|| async {
                let mut document = self.load_document().await?;
                self.merge_flat_sources(&mut document).await?;

                self.context
                    .metrics
                    .repository_records
                    .with_label_values(&[AGGREGATE])
                    .set(document.users.len() as i64);

                tracing::info!(users = document.users.len(), "Loaded authentication data");
                Ok(document)
            })
            .await
    }

    /// Current document, converting the nested legacy shape in place
    async fn load_document(&self) -> Result<AuthDocument, RepositoryError> {
        let Some(bytes) = self.store.read_raw().await? else {
            return Ok(AuthDocument::default());
        };

        match migration::detect_format(&bytes) {
            AuthDocumentFormat::Current => self.store.decode(&bytes),
            AuthDocumentFormat::Nested => {
                let legacy: LegacyNestedDocument =
                    serde_json::from_slice(&bytes).map_err(|e| RepositoryError::Migration {
                        format: migration::NESTED_FORMAT,
                        reason: e.to_string(),
                    })?;

                let now = self.context.clock.now();
                let document = AuthDocument {
                    users: migration::migrate_nested(legacy, now),
                    version: DOCUMENT_VERSION,
                    last_updated: Some(now),
                };

                // Keep the original before replacing it; a crash in between
                // leaves the nested document in place to be migrated again
                let backup = migration::migrated_path(self.store.path());
                self.context
                    .fs
                    .write(&backup, &bytes)
                    .await
                    .map_err(|e| RepositoryError::persistence("write", &backup, e))?;
                self.store.persist(&document).await?;

                self.context.metrics.record_migration(migration::NESTED_FORMAT);
                tracing::info!(
                    users = document.users.len(),
                    backup = %backup.display(),
                    "Migrated nested authentication document"
                );
                Ok(document)
            }
        }
    }

    /// Merge the flat legacy files, if present, then retire them
    async fn merge_flat_sources(&self, document: &mut AuthDocument) -> Result<(), RepositoryError> {
        let fs = self.context.fs.as_ref();
        let tokens_path = self.data_dir.join(LEGACY_TOKENS_FILE);
        let nsfw_path = self.data_dir.join(LEGACY_NSFW_FILE);

        let tokens: Option<BTreeMap<String, LegacyTokenEntry>> =
            migration::read_legacy(fs, &tokens_path, migration::FLAT_FORMAT).await?;
        let verifications: Option<BTreeMap<String, LegacyVerification>> =
            migration::read_legacy(fs, &nsfw_path, migration::FLAT_FORMAT).await?;

        if tokens.is_none() && verifications.is_none() {
            return Ok(());
        }
        let sources: Vec<&Path> = [
            tokens.as_ref().map(|_| tokens_path.as_path()),
            verifications.as_ref().map(|_| nsfw_path.as_path()),
        ]
        .into_iter()
        .flatten()
        .collect();

        let now = self.context.clock.now();
        let migrated = migration::migrate_flat(tokens.unwrap_or_default(), verifications.unwrap_or_default(), now);

        let mut added = 0;
        for (user_id, record) in migrated {
            if document.users.contains_key(&user_id) {
                tracing::debug!(user_id = %user_id, "User already present, legacy entry skipped");
                continue;
            }
            document.users.insert(user_id, record);
            added += 1;
        }

        document.version = DOCUMENT_VERSION;
        document.last_updated = Some(now);
        self.store.persist(document).await?;

        for source in sources {
            migration::retire_source(fs, source).await?;
        }

        self.context.metrics.record_migration(migration::FLAT_FORMAT);
        tracing::info!(added, "Migrated flat legacy token files");
        Ok(())
    }

    pub async fn save(&self, auth: &mut UserAuth) -> Result<(), RepositoryError> {
        self.initialize().await?;

        let user_id = auth.aggregate_id().to_string();
        let record = UserAuthRecord::from_aggregate(auth);
        let now = self.context.clock.now();

        let total = self
            .store
            .mutate(|document| {
                document.users.insert(user_id.clone(), record);
                document.version = DOCUMENT_VERSION;
                document.last_updated = Some(now);
                document.users.len()
            })
            .await?;

        self.context.metrics.record_save(AGGREGATE, total);

        let events = auth.mark_events_as_committed();
        tracing::debug!(user_id = %user_id, events = events.len(), "User auth saved");
        self.context.publish_committed(events).await;

        Ok(())
    }

    pub async fn find_by_user_id(&self, user_id: &UserId) -> Result<Option<UserAuth>, RepositoryError> {
        self.initialize().await?;

        let record = self
            .store
            .read(|document| document.users.get(user_id.as_str()).cloned())
            .await;

        record.as_ref().map(|r| hydrate(r, self.context.clock.now())).transpose()
    }

    /// Owner of a non-revoked token with this exact value
    pub async fn find_by_token(&self, value: &str) -> Result<Option<UserAuth>, RepositoryError> {
        self.initialize().await?;

        let record = self
            .store
            .read(|document| {
                document
                    .users
                    .values()
                    .find(|r| r.token.as_ref().is_some_and(|t| !t.revoked && t.value == value))
                    .cloned()
            })
            .await;

        record.as_ref().map(|r| hydrate(r, self.context.clock.now())).transpose()
    }

    pub async fn find_all(&self) -> Result<Vec<UserAuth>, RepositoryError> {
        self.initialize().await?;

        let records: Vec<UserAuthRecord> = self
            .store
            .read(|document| document.users.values().cloned().collect())
            .await;

        let now = self.context.clock.now();
        records.iter().map(|r| hydrate(r, now)).collect()
    }

    pub async fn delete(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        self.initialize().await?;

        let now = self.context.clock.now();
        let deleted = self
            .store
            .mutate_if(|document| {
                let removed = document.users.remove(user_id.as_str()).is_some();
                if removed {
                    document.last_updated = Some(now);
                }
                (removed, removed)
            })
            .await?;

        if deleted {
            tracing::info!(user_id = %user_id, "User auth deleted");
        }
        Ok(deleted)
    }

    pub async fn exists(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        self.initialize().await?;
        Ok(self.store.read(|document| document.users.contains_key(user_id.as_str())).await)
    }

    pub async fn get_stats(&self) -> Result<AuthStats, RepositoryError> {
        self.initialize().await?;

        let now = self.context.clock.now();
        Ok(self
            .store
            .read(|document| {
                let users = document.users.values();
                AuthStats {
                    users: document.users.len(),
                    with_token: users.clone().filter(|r| r.token.is_some()).count(),
                    valid_tokens: users
                        .clone()
                        .filter(|r| r.token.as_ref().is_some_and(|t| t.is_valid(now)))
                        .count(),
                    nsfw_verified: users.filter(|r| r.nsfw_status.verified).count(),
                }
            })
            .await)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
