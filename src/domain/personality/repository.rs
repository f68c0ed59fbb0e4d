use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::aggregate::Personality;
use super::alias_index::{self, AliasConflict};
use super::value_objects::*;
use crate::event_sourcing::core::AggregateRoot;
use crate::event_sourcing::store::{RepositoryContext, RepositoryError, SnapshotStore};
use crate::utils::ManualClock;

// ============================================================================
// Personality Repository - personalities.json
// ============================================================================
//
// Document: { personalities: {id: record}, aliases: {alias: id}, version,
// lastUpdated }. The alias index is rebuilt per personality on every save and
// healed lazily when a lookup hits an entry whose record is gone.
//
// ============================================================================

pub const PERSONALITIES_FILE: &str = "personalities.json";

const AGGREGATE: &str = "personality";
const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityDocument {
    #[serde(default)]
    pub personalities: BTreeMap<String, PersonalityRecord>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Stored state of one personality. Required fields are optional here so a
/// damaged record is reported at hydration instead of failing the whole load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityRecord {
    pub id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub profile: Option<PersonalityProfile>,
    #[serde(default)]
    pub model: Option<AiModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<PersonalityConfiguration>,
    #[serde(default)]
    pub aliases: Vec<Alias>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub removed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: u64,
}

impl PersonalityRecord {
    pub fn from_aggregate(personality: &Personality) -> Self {
        Self {
            id: personality.aggregate_id().to_string(),
            owner_id: Some(personality.owner_id().to_string()),
            profile: Some(personality.profile().clone()),
            model: Some(personality.model().clone()),
            configuration: personality.configuration().cloned(),
            aliases: personality.aliases().to_vec(),
            created_at: Some(personality.created_at()),
            updated_at: Some(personality.updated_at()),
            removed: personality.is_removed(),
            removed_at: personality.removed_at(),
            version: personality.version(),
        }
    }
}

/// Factory plus field assignment; no event replay
/// `now` stands in for a creation time the record never carried
fn hydrate(record: &PersonalityRecord, now: DateTime<Utc>) -> Result<Personality, RepositoryError> {
    let missing = |field: &str| RepositoryError::hydration(AGGREGATE, &record.id, format!("missing {field}"));

    let owner_id = record
        .owner_id
        .as_deref()
        .filter(|owner| !owner.trim().is_empty())
        .ok_or_else(|| missing("owner id"))?;
    let profile = record.profile.clone().ok_or_else(|| missing("profile"))?;
    let created_at = record.created_at.or(record.updated_at).unwrap_or(now);

    let mut personality = Personality::create(
        PersonalityId::new(&record.id),
        UserId::new(owner_id),
        profile,
        record.model.clone().unwrap_or_default(),
        &ManualClock::new(created_at),
    )
    .map_err(|e| RepositoryError::hydration(AGGREGATE, &record.id, e.to_string()))?;

    personality.configuration = record.configuration.clone();
    personality.aliases = record.aliases.clone();
    personality.removed = record.removed;
    personality.removed_at = record.removed_at;
    personality.updated_at = record.updated_at.unwrap_or(created_at);
    personality.root.restore_version(record.version);
    personality.mark_events_as_committed();

    Ok(personality)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityStats {
    pub total: usize,
    pub active: usize,
    pub removed: usize,
    pub aliases: usize,
    pub owners: usize,
}

enum AliasLookup {
    Missing,
    Found(PersonalityRecord),
    Orphaned(String),
}

pub struct PersonalityRepository {
    store: SnapshotStore<PersonalityDocument>,
    context: RepositoryContext,
}

impl PersonalityRepository {
    pub fn new(data_dir: impl AsRef<Path>, context: RepositoryContext) -> Self {
        let store = context.snapshot_store(AGGREGATE, data_dir.as_ref().join(PERSONALITIES_FILE));
        Self { store, context }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Load the document once; later calls are no-ops
    pub async fn initialize(&self) -> Result<(), RepositoryError> {
        self.store
            .initialize_with(|| async {
                let mut document = self.store.load_from_disk().await?;

                let repaired = alias_index::repair_missing(&mut document.aliases, &document.personalities);
                if repaired > 0 {
                    tracing::info!(repaired, "Re-added aliases missing from the index");
                    self.store.persist(&document).await?;
                }

                self.context
                    .metrics
                    .repository_records
                    .with_label_values(&[AGGREGATE])
                    .set(document.personalities.len() as i64);

                tracing::info!(
                    personalities = document.personalities.len(),
                    aliases = document.aliases.len(),
                    "Loaded personalities"
                );
                Ok(document)
            })
            .await
    }

    /// Snapshot the personality, reindex its aliases, then commit and
    /// publish its pending events
    pub async fn save(&self, personality: &mut Personality) -> Result<(), RepositoryError> {
        self.initialize().await?;

        let id = personality.aggregate_id().to_string();
        let record = PersonalityRecord::from_aggregate(personality);
        let now = self.context.clock.now();
        let metrics = self.context.metrics.clone();

        let total = self
            .store
            .mutate(|document| {
                let conflicts = alias_index::reindex(&mut document.aliases, &id, &record.aliases);
                for AliasConflict { alias, claimed_by, held_by } in &conflicts {
                    tracing::warn!(
                        alias = %alias,
                        personality_id = %claimed_by,
                        held_by = %held_by,
                        "Alias already belongs to another personality, not indexed"
                    );
                    metrics.record_alias_conflict();
                }

                document.personalities.insert(id.clone(), record);
                document.version = DOCUMENT_VERSION;
                document.last_updated = Some(now);
                document.personalities.len()
            })
            .await?;

        self.context.metrics.record_save(AGGREGATE, total);

        let events = personality.mark_events_as_committed();
        tracing::debug!(
            personality_id = %id,
            version = personality.version(),
            events = events.len(),
            "Personality saved"
        );
        self.context.publish_committed(events).await;

        Ok(())
    }

    pub async fn find_by_id(&self, id: &PersonalityId) -> Result<Option<Personality>, RepositoryError> {
        self.initialize().await?;

        let record = self
            .store
            .read(|document| document.personalities.get(id.as_str()).cloned())
            .await;

        record.as_ref().map(|r| hydrate(r, self.context.clock.now())).transpose()
    }

    /// Case-insensitive alias lookup. An index entry whose personality no
    /// longer exists is removed and reported as not found.
    pub async fn find_by_alias(&self, alias: &str) -> Result<Option<Personality>, RepositoryError> {
        self.initialize().await?;

        let key = normalize_alias(alias);
        let lookup = self
            .store
            .read(|document| match document.aliases.get(&key) {
                None => AliasLookup::Missing,
                Some(id) => match document.personalities.get(id) {
                    Some(record) => AliasLookup::Found(record.clone()),
                    None => AliasLookup::Orphaned(id.clone()),
                },
            })
            .await;

        match lookup {
            AliasLookup::Missing => Ok(None),
            AliasLookup::Found(record) => hydrate(&record, self.context.clock.now()).map(Some),
            AliasLookup::Orphaned(target) => {
                self.remove_orphaned_alias(&key, &target).await?;
                Ok(None)
            }
        }
    }

    async fn remove_orphaned_alias(&self, key: &str, target: &str) -> Result<(), RepositoryError> {
        // Re-checked under the writer lock: a concurrent lookup may have
        // already removed it, or a save may have re-pointed it.
        let removed = self
            .store
            .mutate_if(|document| {
                let stale = document
                    .aliases
                    .get(key)
                    .is_some_and(|owner| !document.personalities.contains_key(owner));
                if stale {
                    document.aliases.remove(key);
                }
                (stale, stale)
            })
            .await?;

        if removed {
            self.context.metrics.record_orphan_cleanup();
            tracing::warn!(alias = %key, personality_id = %target, "Removed orphaned alias index entry");
        }
        Ok(())
    }

    /// Exact id first, then alias
    pub async fn find_by_name_or_alias(&self, term: &str) -> Result<Option<Personality>, RepositoryError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(None);
        }

        if let Some(personality) = self.find_by_id(&PersonalityId::new(term)).await? {
            return Ok(Some(personality));
        }
        self.find_by_alias(term).await
    }

    /// Live personalities owned by `owner_id`
    pub async fn find_by_owner(&self, owner_id: &UserId) -> Result<Vec<Personality>, RepositoryError> {
        self.initialize().await?;

        let records: Vec<PersonalityRecord> = self
            .store
            .read(|document| {
                document
                    .personalities
                    .values()
                    .filter(|r| !r.removed && r.owner_id.as_deref() == Some(owner_id.as_str()))
                    .cloned()
                    .collect()
            })
            .await;

        let now = self.context.clock.now();
        records.iter().map(|r| hydrate(r, now)).collect()
    }

    /// All live personalities, ordered by id
    pub async fn find_all(&self) -> Result<Vec<Personality>, RepositoryError> {
        self.initialize().await?;

        let records: Vec<PersonalityRecord> = self
            .store
            .read(|document| document.personalities.values().filter(|r| !r.removed).cloned().collect())
            .await;

        let now = self.context.clock.now();
        records.iter().map(|r| hydrate(r, now)).collect()
    }

    /// Physically remove the record and every index entry pointing to it
    pub async fn delete(&self, id: &PersonalityId) -> Result<bool, RepositoryError> {
        self.initialize().await?;

        let now = self.context.clock.now();
        let (deleted, total) = self
            .store
            .mutate_if(|document| {
                let record = document.personalities.remove(id.as_str()).is_some();
                let aliases = alias_index::remove_owner(&mut document.aliases, id.as_str());
                let changed = record || aliases > 0;
                if changed {
                    document.last_updated = Some(now);
                }
                ((record, document.personalities.len()), changed)
            })
            .await?;

        if deleted {
            self.context
                .metrics
                .repository_records
                .with_label_values(&[AGGREGATE])
                .set(total as i64);
            tracing::info!(personality_id = %id, "Personality deleted");
        }
        Ok(deleted)
    }

    pub async fn exists(&self, id: &PersonalityId) -> Result<bool, RepositoryError> {
        self.initialize().await?;
        Ok(self.store.read(|document| document.personalities.contains_key(id.as_str())).await)
    }

    pub async fn get_stats(&self) -> Result<PersonalityStats, RepositoryError> {
        self.initialize().await?;

        Ok(self
            .store
            .read(|document| {
                let removed = document.personalities.values().filter(|r| r.removed).count();
                let owners: BTreeSet<&str> = document
                    .personalities
                    .values()
                    .filter(|r| !r.removed)
                    .filter_map(|r| r.owner_id.as_deref())
                    .collect();

                PersonalityStats {
                    total: document.personalities.len(),
                    active: document.personalities.len() - removed,
                    removed,
                    aliases: document.aliases.len(),
                    owners: owners.len(),
                }
            })
            .await)
    }

    /// Discard the index and rebuild it from the records. Returns the number
    /// of indexed aliases.
    pub async fn rebuild_alias_index(&self) -> Result<usize, RepositoryError> {
        self.initialize().await?;

        let metrics = self.context.metrics.clone();
        let now = self.context.clock.now();
        let count = self
            .store
            .mutate_if(|document| {
                let (index, conflicts) = alias_index::rebuild(&document.personalities);
                for conflict in &conflicts {
                    tracing::warn!(
                        alias = %conflict.alias,
                        personality_id = %conflict.claimed_by,
                        held_by = %conflict.held_by,
                        "Alias claimed by more than one personality"
                    );
                    metrics.record_alias_conflict();
                }

                let changed = index != document.aliases;
                if changed {
                    document.aliases = index;
                    document.last_updated = Some(now);
                }
                (document.aliases.len(), changed)
            })
            .await?;

        tracing::info!(aliases = count, "Alias index rebuilt");
        Ok(count)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::bus::EventBus;
    use crate::event_sourcing::store::fs::testing::CountingFileSystem;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(clock: Arc<ManualClock>) -> RepositoryContext {
        RepositoryContext::new().with_clock(clock)
    }

    fn local(name: &str) -> PersonalityProfile {
        PersonalityProfile::Local(LocalProfile {
            display_name: name.to_string(),
            prompt: format!("You are {name}."),
            model_path: None,
            max_word_count: None,
            avatar_url: None,
        })
    }

    fn personality(id: &str, owner: &str, clock: &ManualClock) -> Personality {
        Personality::create(
            PersonalityId::new(id),
            UserId::new(owner),
            local(id),
            AiModel::new("test-model", "https://models.example/v1"),
            clock,
        )
        .unwrap()
    }

    async fn index(repo: &PersonalityRepository) -> BTreeMap<String, String> {
        repo.store.read(|document| document.aliases.clone()).await
    }

    #[tokio::test]
    async fn test_index_mirrors_alias_list_after_save() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = PersonalityRepository::new(tmp.path(), context(clock.clone()));

        let mut aria = personality("aria", "u1", &clock);
        aria.add_alias("Muse", clock.as_ref()).unwrap();
        aria.add_alias("Bard", clock.as_ref()).unwrap();
        repo.save(&mut aria).await.unwrap();

        aria.remove_alias("muse", clock.as_ref()).unwrap();
        aria.add_alias("Poet", clock.as_ref()).unwrap();
        repo.save(&mut aria).await.unwrap();

        let index = index(&repo).await;
        let indexed: Vec<&str> = index.keys().map(String::as_str).collect();
        assert_eq!(indexed, vec!["bard", "poet"]);
        assert!(index.values().all(|id| id == "aria"));
    }

    #[tokio::test]
    async fn test_first_writer_wins_across_personalities() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let metrics = Arc::new(crate::metrics::Metrics::new().unwrap());
        let repo = PersonalityRepository::new(
            tmp.path(),
            context(clock.clone()).with_metrics(metrics.clone()),
        );

        let mut b = personality("b", "u1", &clock);
        b.add_alias("x", clock.as_ref()).unwrap();
        repo.save(&mut b).await.unwrap();

        let mut a = personality("a", "u2", &clock);
        a.add_alias("X", clock.as_ref()).unwrap();
        repo.save(&mut a).await.unwrap();

        assert_eq!(index(&repo).await.get("x").map(String::as_str), Some("b"));
        assert_eq!(repo.find_by_alias("x").await.unwrap().unwrap().aggregate_id(), "b");
        assert_eq!(metrics.alias_conflicts.get(), 1);

        // The loser still carries the alias on its own record
        let a = repo.find_by_id(&PersonalityId::new("a")).await.unwrap().unwrap();
        assert!(a.has_alias("x"));
    }

    #[tokio::test]
    async fn test_orphaned_alias_is_removed_once() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(PERSONALITIES_FILE),
            r#"{ "personalities": {}, "aliases": { "ghost": "deleted-id" }, "version": 1 }"#,
        )
        .unwrap();

        let fs = CountingFileSystem::default();
        let metrics = Arc::new(crate::metrics::Metrics::new().unwrap());
        let repo = PersonalityRepository::new(
            tmp.path(),
            RepositoryContext::new()
                .with_file_system(Arc::new(fs.clone()))
                .with_metrics(metrics.clone()),
        );
        repo.initialize().await.unwrap();
        assert_eq!(fs.renames(), 0);

        assert!(repo.find_by_alias("Ghost").await.unwrap().is_none());
        assert!(repo.find_by_alias("ghost").await.unwrap().is_none());

        assert_eq!(fs.renames(), 1);
        assert!(index(&repo).await.is_empty());
        assert_eq!(metrics.orphaned_alias_cleanups.get(), 1);

        let on_disk: PersonalityDocument =
            serde_json::from_slice(&std::fs::read(repo.path()).unwrap()).unwrap();
        assert!(on_disk.aliases.is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_is_lossless() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = PersonalityRepository::new(tmp.path(), context(clock.clone()));

        let mut aria = personality("aria", "u1", &clock);
        aria.add_alias("Muse", clock.as_ref()).unwrap();
        aria.update_configuration(
            PersonalityConfiguration { max_word_count: Some(300), ..Default::default() },
            clock.as_ref(),
        )
        .unwrap();
        repo.save(&mut aria).await.unwrap();
        let saved = PersonalityRecord::from_aggregate(&aria);

        let reopened = PersonalityRepository::new(tmp.path(), context(clock.clone()));
        let loaded = reopened.find_by_id(&PersonalityId::new("aria")).await.unwrap().unwrap();

        assert_eq!(PersonalityRecord::from_aggregate(&loaded), saved);
        assert_eq!(loaded.version(), 3);
    }

    #[tokio::test]
    async fn test_hydrated_aggregates_have_no_pending_events() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = PersonalityRepository::new(tmp.path(), context(clock.clone()));

        let mut aria = personality("aria", "u1", &clock);
        aria.add_alias("muse", clock.as_ref()).unwrap();
        assert_eq!(aria.uncommitted_events().len(), 2);
        repo.save(&mut aria).await.unwrap();
        assert!(aria.uncommitted_events().is_empty());

        let by_id = repo.find_by_id(&PersonalityId::new("aria")).await.unwrap().unwrap();
        let by_alias = repo.find_by_alias("MUSE").await.unwrap().unwrap();
        assert!(by_id.uncommitted_events().is_empty());
        assert!(by_alias.uncommitted_events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_owner_is_hydration_error() {
        let tmp = TempDir::new().unwrap();
        let raw = r#"{
            "personalities": {
                "broken": { "id": "broken", "profile": { "mode": "external" }, "aliases": [] }
            },
            "aliases": {}
        }"#;
        std::fs::write(tmp.path().join(PERSONALITIES_FILE), raw).unwrap();

        let repo = PersonalityRepository::new(tmp.path(), RepositoryContext::new());
        let result = repo.find_by_id(&PersonalityId::new("broken")).await;

        assert!(matches!(result, Err(RepositoryError::Hydration { .. })));
        assert!(repo.exists(&PersonalityId::new("broken")).await.unwrap());
        assert_eq!(std::fs::read_to_string(repo.path()).unwrap(), raw);
    }

    #[tokio::test]
    async fn test_undated_record_takes_current_time_not_epoch() {
        use chrono::TimeZone;

        let tmp = TempDir::new().unwrap();
        let raw = r#"{
            "personalities": {
                "legacy": { "id": "legacy", "ownerId": "u1", "profile": { "mode": "external" }, "aliases": [] }
            },
            "aliases": {}
        }"#;
        std::fs::write(tmp.path().join(PERSONALITIES_FILE), raw).unwrap();

        let loaded_at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(loaded_at));
        let repo = PersonalityRepository::new(tmp.path(), context(clock.clone()));

        let mut legacy = repo.find_by_id(&PersonalityId::new("legacy")).await.unwrap().unwrap();
        assert_eq!(legacy.created_at(), loaded_at);
        assert_eq!(legacy.updated_at(), loaded_at);

        repo.save(&mut legacy).await.unwrap();
        let document: serde_json::Value = serde_json::from_slice(&std::fs::read(repo.path()).unwrap()).unwrap();
        let stored: DateTime<Utc> =
            serde_json::from_value(document["personalities"]["legacy"]["createdAt"].clone()).unwrap();
        assert_eq!(stored, loaded_at);
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_aliases() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = PersonalityRepository::new(tmp.path(), context(clock.clone()));

        let mut aria = personality("aria", "u1", &clock);
        aria.add_alias("muse", clock.as_ref()).unwrap();
        repo.save(&mut aria).await.unwrap();

        assert!(repo.delete(&PersonalityId::new("aria")).await.unwrap());
        assert!(!repo.delete(&PersonalityId::new("aria")).await.unwrap());
        assert!(!repo.exists(&PersonalityId::new("aria")).await.unwrap());
        assert!(index(&repo).await.is_empty());
    }

    #[tokio::test]
    async fn test_soft_removed_personalities_are_hidden_from_listings() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = PersonalityRepository::new(tmp.path(), context(clock.clone()));

        let mut aria = personality("aria", "u1", &clock);
        let mut bard = personality("bard", "u1", &clock);
        let mut echo = personality("echo", "u2", &clock);
        bard.remove(clock.as_ref()).unwrap();
        for p in [&mut aria, &mut bard, &mut echo] {
            repo.save(p).await.unwrap();
        }

        assert_eq!(repo.find_all().await.unwrap().len(), 2);
        assert_eq!(repo.find_by_owner(&UserId::new("u1")).await.unwrap().len(), 1);

        let removed = repo.find_by_id(&PersonalityId::new("bard")).await.unwrap().unwrap();
        assert!(removed.is_removed());

        let stats = repo.get_stats().await.unwrap();
        assert_eq!(stats, PersonalityStats { total: 3, active: 2, removed: 1, aliases: 0, owners: 2 });
    }

    #[tokio::test]
    async fn test_find_by_name_or_alias() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = PersonalityRepository::new(tmp.path(), context(clock.clone()));

        let mut aria = personality("aria", "u1", &clock);
        aria.add_alias("The Muse", clock.as_ref()).unwrap();
        repo.save(&mut aria).await.unwrap();

        let by_id = repo.find_by_name_or_alias("aria").await.unwrap().unwrap();
        let by_alias = repo.find_by_name_or_alias(" the muse ").await.unwrap().unwrap();
        assert_eq!(by_id.aggregate_id(), "aria");
        assert_eq!(by_alias.aggregate_id(), "aria");
        assert!(repo.find_by_name_or_alias("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_repairs_missing_index_entries() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        {
            let repo = PersonalityRepository::new(tmp.path(), context(clock.clone()));
            let mut aria = personality("aria", "u1", &clock);
            aria.add_alias("muse", clock.as_ref()).unwrap();
            repo.save(&mut aria).await.unwrap();
        }

        // Drop the index out-of-band
        let path = tmp.path().join(PERSONALITIES_FILE);
        let mut document: PersonalityDocument =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        document.aliases.clear();
        std::fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

        let repo = PersonalityRepository::new(tmp.path(), context(clock.clone()));
        let found = repo.find_by_alias("muse").await.unwrap();
        assert_eq!(found.unwrap().aggregate_id(), "aria");
    }

    #[tokio::test]
    async fn test_rebuild_alias_index_prefers_oldest_personality() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = PersonalityRepository::new(tmp.path(), context(clock.clone()));

        let mut old = personality("zeta", "u1", &clock);
        old.add_alias("shared", clock.as_ref()).unwrap();
        clock.advance_ms(1_000);
        let mut new = personality("alpha", "u2", &clock);
        new.add_alias("shared", clock.as_ref()).unwrap();
        new.add_alias("own", clock.as_ref()).unwrap();

        // Saved newest first, so the live index gives "shared" to alpha
        repo.save(&mut new).await.unwrap();
        repo.save(&mut old).await.unwrap();
        assert_eq!(index(&repo).await.get("shared").map(String::as_str), Some("alpha"));

        assert_eq!(repo.rebuild_alias_index().await.unwrap(), 2);
        let index = index(&repo).await;
        assert_eq!(index.get("shared").map(String::as_str), Some("zeta"));
        assert_eq!(index.get("own").map(String::as_str), Some("alpha"));
    }

    #[tokio::test]
    async fn test_save_publishes_committed_events() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _subscription = bus.subscribe("PersonalityAliasAdded", move |_record| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        });

        let repo = PersonalityRepository::new(tmp.path(), context(clock.clone()).with_event_bus(bus));
        let mut aria = personality("aria", "u1", &clock);
        aria.add_alias("muse", clock.as_ref()).unwrap();
        aria.add_alias("bard", clock.as_ref()).unwrap();
        repo.save(&mut aria).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_pending_events() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let fs = CountingFileSystem::default();
        let repo = PersonalityRepository::new(
            tmp.path(),
            context(clock.clone()).with_file_system(Arc::new(fs.clone())),
        );
        repo.initialize().await.unwrap();

        fs.fail_renames(true);
        let mut aria = personality("aria", "u1", &clock);
        let result = repo.save(&mut aria).await;

        assert!(matches!(result, Err(RepositoryError::Persistence { .. })));
        assert_eq!(aria.uncommitted_events().len(), 1);
    }
}
