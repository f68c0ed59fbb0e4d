use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::aggregate::Conversation;
use super::value_objects::*;
use crate::domain::personality::{PersonalityId, UserId};
use crate::event_sourcing::core::AggregateRoot;
use crate::event_sourcing::store::{RepositoryContext, RepositoryError, SnapshotStore};
use crate::utils::{elapsed_ms, ManualClock};

// ============================================================================
// Conversation Repository - conversations.json
// ============================================================================
//
// Document: { conversations: {id: record}, channelActivations: {channel:
// activation}, version, lastUpdated }. Only the most recent messages are
// persisted; the in-memory aggregate keeps whatever it accumulated.
//
// ============================================================================

pub const CONVERSATIONS_FILE: &str = "conversations.json";
pub const DEFAULT_MAX_MESSAGES: usize = 100;

const AGGREGATE: &str = "conversation";
const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDocument {
    #[serde(default)]
    pub conversations: BTreeMap<String, ConversationRecord>,
    #[serde(default)]
    pub channel_activations: BTreeMap<String, ChannelActivation>,
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub active_personality_id: Option<String>,
    #[serde(default)]
    pub settings: ConversationSettings,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    #[serde(default)]
    pub version: u64,
}

impl ConversationRecord {
    /// Snapshot of the aggregate keeping only the last `max_messages` messages
    pub fn from_aggregate(conversation: &Conversation, max_messages: usize) -> Self {
        let messages = conversation.messages();
        let keep = max_messages.max(1);
        let window = &messages[messages.len().saturating_sub(keep)..];

        Self {
            id: conversation.aggregate_id().to_string(),
            user_id: Some(conversation.user_id().to_string()),
            channel_id: Some(conversation.channel_id().to_string()),
            messages: window.to_vec(),
            active_personality_id: Some(conversation.active_personality_id().to_string()),
            settings: conversation.settings().clone(),
            started_at: Some(conversation.started_at()),
            last_activity_at: Some(conversation.last_activity_at()),
            ended: conversation.is_ended(),
            ended_at: conversation.ended_at(),
            end_reason: conversation.end_reason(),
            version: conversation.version(),
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        if self.ended {
            return false;
        }
        match self.last_activity_at {
            Some(last) if self.settings.timeout_ms > 0 => {
                elapsed_ms(last, now) <= self.settings.timeout_ms
            }
            _ => true,
        }
    }
}

fn hydrate(record: &ConversationRecord) -> Result<Conversation, RepositoryError> {
    let missing = |field: &str| RepositoryError::hydration(AGGREGATE, &record.id, format!("missing {field}"));

    let user_id = record.user_id.as_deref().filter(|u| !u.is_empty()).ok_or_else(|| missing("user id"))?;
    let channel_id = record
        .channel_id
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| missing("channel id"))?;
    let personality_id = record
        .active_personality_id
        .as_deref()
        .ok_or_else(|| missing("active personality id"))?;
    let first = record.messages.first().cloned().ok_or_else(|| missing("messages"))?;
    let started_at = record.started_at.unwrap_or(first.timestamp);

    let mut conversation = Conversation::start(
        ConversationId::new(&record.id),
        first,
        PersonalityId::new(personality_id),
        record.settings.clone(),
        &ManualClock::new(started_at),
    )
    .map_err(|e| RepositoryError::hydration(AGGREGATE, &record.id, e.to_string()))?;

    // Participants come from the record, not from whoever wrote the oldest
    // message still in the persisted window
    conversation.user_id = UserId::new(user_id);
    conversation.channel_id = ChannelId::new(channel_id);
    conversation.messages = record.messages.clone();
    conversation.last_activity_at = record.last_activity_at.unwrap_or(started_at);
    conversation.ended = record.ended;
    conversation.ended_at = record.ended_at;
    conversation.end_reason = record.end_reason;
    conversation.root.restore_version(record.version);
    conversation.mark_events_as_committed();

    Ok(conversation)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStats {
    pub total: usize,
    pub active: usize,
    pub ended: usize,
    pub messages: usize,
    pub channel_activations: usize,
}

pub struct ConversationRepository {
    store: SnapshotStore<ConversationDocument>,
    context: RepositoryContext,
    max_messages: usize,
}

impl ConversationRepository {
    pub fn new(data_dir: impl AsRef<Path>, context: RepositoryContext) -> Self {
        let store = context.snapshot_store(AGGREGATE, data_dir.as_ref().join(CONVERSATIONS_FILE));
        Self {
            store,
            context,
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }

    /// Persisted message window per conversation (at least one)
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub async fn initialize(&self) -> Result<(), RepositoryError> {
        self.store
            .initialize_with(|| async {
                let document = self.store.load_from_disk().await?;

                self.context
                    .metrics
                    .repository_records
                    .with_label_values(&[AGGREGATE])
                    .set(document.conversations.len() as i64);

                tracing::info!(
                    conversations = document.conversations.len(),
                    channel_activations = document.channel_activations.len(),
                    "Loaded conversations"
                );
                Ok(document)
            })
            .await
    }

    pub async fn save(&self, conversation: &mut Conversation) -> Result<(), RepositoryError> {
        self.initialize().await?;

        let id = conversation.aggregate_id().to_string();
        let record = ConversationRecord::from_aggregate(conversation, self.max_messages);
        let now = self.context.clock.now();

        let total = self
            .store
            .mutate(|document| {
                document.conversations.insert(id.clone(), record);
                document.version = DOCUMENT_VERSION;
                document.last_updated = Some(now);
                document.conversations.len()
            })
            .await?;

        self.context.metrics.record_save(AGGREGATE, total);

        let events = conversation.mark_events_as_committed();
        tracing::debug!(
            conversation_id = %id,
            version = conversation.version(),
            events = events.len(),
            "Conversation saved"
        );
        self.context.publish_committed(events).await;

        Ok(())
    }

    pub async fn find_by_id(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        self.initialize().await?;

        let record = self
            .store
            .read(|document| document.conversations.get(id.as_str()).cloned())
            .await;

        record.as_ref().map(hydrate).transpose()
    }

    /// Most recently active conversation of `user_id` that has neither ended
    /// nor timed out
    pub async fn find_active_by_user(&self, user_id: &UserId) -> Result<Option<Conversation>, RepositoryError> {
        self.initialize().await?;

        let now = self.context.clock.now();
        let record = self
            .store
            .read(|document| {
                document
                    .conversations
                    .values()
                    .filter(|r| r.user_id.as_deref() == Some(user_id.as_str()) && r.is_live(now))
                    .max_by_key(|r| r.last_activity_at)
                    .cloned()
            })
            .await;

        record.as_ref().map(hydrate).transpose()
    }

    /// Every conversation held in `channel_id`, most recent activity first
    pub async fn find_by_channel(&self, channel_id: &ChannelId) -> Result<Vec<Conversation>, RepositoryError> {
        self.initialize().await?;

        let mut records: Vec<ConversationRecord> = self
            .store
            .read(|document| {
                document
                    .conversations
                    .values()
                    .filter(|r| r.channel_id.as_deref() == Some(channel_id.as_str()))
                    .cloned()
                    .collect()
            })
            .await;
        records.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));

        records.iter().map(hydrate).collect()
    }

    pub async fn find_all(&self) -> Result<Vec<Conversation>, RepositoryError> {
        self.initialize().await?;

        let records: Vec<ConversationRecord> = self
            .store
            .read(|document| document.conversations.values().cloned().collect())
            .await;

        records.iter().map(hydrate).collect()
    }

    pub async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError> {
        self.initialize().await?;

        let now = self.context.clock.now();
        let deleted = self
            .store
            .mutate_if(|document| {
                let removed = document.conversations.remove(id.as_str()).is_some();
                if removed {
                    document.last_updated = Some(now);
                }
                (removed, removed)
            })
            .await?;

        if deleted {
            tracing::info!(conversation_id = %id, "Conversation deleted");
        }
        Ok(deleted)
    }

    pub async fn exists(&self, id: &ConversationId) -> Result<bool, RepositoryError> {
        self.initialize().await?;
        Ok(self.store.read(|document| document.conversations.contains_key(id.as_str())).await)
    }

    /// Physically remove conversations that ended more than `older_than_ms`
    /// ago. Returns how many were removed.
    pub async fn cleanup_ended(&self, older_than_ms: u64) -> Result<usize, RepositoryError> {
        self.initialize().await?;

        let now = self.context.clock.now();
        let removed = self
            .store
            .mutate_if(|document| {
                let before = document.conversations.len();
                document.conversations.retain(|_, record| {
                    !(record.ended
                        && record
                            .ended_at
                            .is_some_and(|ended_at| elapsed_ms(ended_at, now) > older_than_ms))
                });
                let removed = before - document.conversations.len();
                if removed > 0 {
                    document.last_updated = Some(now);
                }
                (removed, removed > 0)
            })
            .await?;

        if removed > 0 {
            tracing::info!(removed, "Cleaned up ended conversations");
        }
        Ok(removed)
    }

    // ========================================================================
    // Channel Activations
    // ========================================================================

    /// Bind a personality to a whole channel, replacing any previous binding
    pub async fn activate_channel(
        &self,
        channel_id: &ChannelId,
        personality_id: &PersonalityId,
        activated_by: &UserId,
    ) -> Result<ChannelActivation, RepositoryError> {
        self.initialize().await?;

        let activation = ChannelActivation {
            channel_id: channel_id.clone(),
            personality_id: personality_id.clone(),
            activated_by: activated_by.clone(),
            activated_at: self.context.clock.now(),
        };

        let stored = activation.clone();
        self.store
            .mutate(|document| {
                document.channel_activations.insert(channel_id.to_string(), stored);
                document.last_updated = Some(activation.activated_at);
            })
            .await?;

        tracing::info!(
            channel_id = %channel_id,
            personality_id = %personality_id,
            activated_by = %activated_by,
            "Channel activated"
        );
        Ok(activation)
    }

    pub async fn deactivate_channel(&self, channel_id: &ChannelId) -> Result<bool, RepositoryError> {
        self.initialize().await?;

        let now = self.context.clock.now();
        let removed = self
            .store
            .mutate_if(|document| {
                let removed = document.channel_activations.remove(channel_id.as_str()).is_some();
                if removed {
                    document.last_updated = Some(now);
                }
                (removed, removed)
            })
            .await?;

        if removed {
            tracing::info!(channel_id = %channel_id, "Channel deactivated");
        }
        Ok(removed)
    }

    pub async fn get_channel_activation(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Option<ChannelActivation>, RepositoryError> {
        self.initialize().await?;
        Ok(self
            .store
            .read(|document| document.channel_activations.get(channel_id.as_str()).cloned())
            .await)
    }

    pub async fn list_channel_activations(&self) -> Result<Vec<ChannelActivation>, RepositoryError> {
        self.initialize().await?;
        Ok(self
            .store
            .read(|document| document.channel_activations.values().cloned().collect())
            .await)
    }

    pub async fn get_stats(&self) -> Result<ConversationStats, RepositoryError> {
        self.initialize().await?;

        let now = self.context.clock.now();
        Ok(self
            .store
            .read(|document| ConversationStats {
                total: document.conversations.len(),
                active: document.conversations.values().filter(|r| r.is_live(now)).count(),
                ended: document.conversations.values().filter(|r| r.ended).count(),
                messages: document.conversations.values().map(|r| r.messages.len()).sum(),
                channel_activations: document.channel_activations.len(),
            })
            .await)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conversation::ConversationError;
    use crate::utils::Clock;
    use std::sync::Arc;
    use tempfile::TempDir;

    const TIMEOUT_MS: u64 = 60_000;

    fn repository(tmp: &TempDir, clock: Arc<ManualClock>) -> ConversationRepository {
        ConversationRepository::new(tmp.path(), RepositoryContext::new().with_clock(clock))
    }

    fn start(user: &str, channel: &str, clock: &ManualClock) -> Conversation {
        let user = UserId::new(user);
        let channel = ChannelId::new(channel);
        Conversation::start(
            ConversationId::for_participants(&user, &channel),
            Message::from_user("m0", &user, &channel, "hello", clock.now()),
            PersonalityId::new("aria"),
            ConversationSettings { timeout_ms: TIMEOUT_MS, ..Default::default() },
            clock,
        )
        .unwrap()
    }

    fn say(conversation: &mut Conversation, n: usize, clock: &ManualClock) {
        let user = conversation.user_id().clone();
        let channel = conversation.channel_id().clone();
        conversation
            .add_message(Message::from_user(format!("m{n}"), &user, &channel, format!("line {n}"), clock.now()), clock)
            .unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_is_lossless() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = repository(&tmp, clock.clone());

        let mut conversation = start("u1", "c1", &clock);
        say(&mut conversation, 1, &clock);
        conversation.assign_personality(PersonalityId::new("bard"), clock.as_ref()).unwrap();
        repo.save(&mut conversation).await.unwrap();
        let saved = ConversationRecord::from_aggregate(&conversation, DEFAULT_MAX_MESSAGES);

        let reopened = repository(&tmp, clock.clone());
        let loaded = reopened.find_by_id(&conversation.conversation_id()).await.unwrap().unwrap();

        assert_eq!(ConversationRecord::from_aggregate(&loaded, DEFAULT_MAX_MESSAGES), saved);
        assert!(loaded.uncommitted_events().is_empty());
        assert_eq!(loaded.version(), 3);
    }

    #[tokio::test]
    async fn test_messages_truncated_to_window() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = repository(&tmp, clock.clone()).with_max_messages(3);

        let mut conversation = start("u1", "c1", &clock);
        for n in 1..=5 {
            say(&mut conversation, n, &clock);
        }
        repo.save(&mut conversation).await.unwrap();
        assert_eq!(conversation.messages().len(), 6);

        let loaded = repo.find_by_id(&conversation.conversation_id()).await.unwrap().unwrap();
        let ids: Vec<&str> = loaded.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m4", "m5"]);
        assert_eq!(loaded.user_id().as_str(), "u1");
    }

    #[tokio::test]
    async fn test_timeout_persisted_after_failed_write() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = repository(&tmp, clock.clone());

        let mut conversation = start("u1", "c1", &clock);
        repo.save(&mut conversation).await.unwrap();

        clock.advance_ms(TIMEOUT_MS as i64 + 1);
        let mut loaded = repo.find_by_id(&conversation.conversation_id()).await.unwrap().unwrap();
        let result = loaded.add_message(
            Message::from_user("late", &UserId::new("u1"), &ChannelId::new("c1"), "hi", clock.now()),
            clock.as_ref(),
        );
        assert!(matches!(result, Err(ConversationError::TimedOut { .. })));
        repo.save(&mut loaded).await.unwrap();

        let reloaded = repo.find_by_id(&conversation.conversation_id()).await.unwrap().unwrap();
        assert!(reloaded.is_ended());
        assert_eq!(reloaded.end_reason(), Some(EndReason::Timeout));
    }

    #[tokio::test]
    async fn test_find_active_by_user_skips_ended_and_timed_out() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = repository(&tmp, clock.clone());

        let mut stale = start("u1", "old", &clock);
        repo.save(&mut stale).await.unwrap();

        clock.advance_ms(TIMEOUT_MS as i64 + 1);
        let mut ended = start("u1", "closed", &clock);
        ended.end(clock.as_ref()).unwrap();
        repo.save(&mut ended).await.unwrap();

        assert!(repo.find_active_by_user(&UserId::new("u1")).await.unwrap().is_none());

        let mut live = start("u1", "c1", &clock);
        repo.save(&mut live).await.unwrap();
        let mut other = start("u2", "c1", &clock);
        repo.save(&mut other).await.unwrap();

        let active = repo.find_active_by_user(&UserId::new("u1")).await.unwrap().unwrap();
        assert_eq!(active.aggregate_id(), "u1-c1");
        assert_eq!(repo.find_by_channel(&ChannelId::new("c1")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_ended() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = repository(&tmp, clock.clone());

        let mut done = start("u1", "c1", &clock);
        done.end(clock.as_ref()).unwrap();
        repo.save(&mut done).await.unwrap();
        let mut open = start("u2", "c1", &clock);
        repo.save(&mut open).await.unwrap();

        assert_eq!(repo.cleanup_ended(1_000).await.unwrap(), 0);
        clock.advance_ms(1_001);
        assert_eq!(repo.cleanup_ended(1_000).await.unwrap(), 1);

        assert!(!repo.exists(&done.conversation_id()).await.unwrap());
        assert!(repo.exists(&open.conversation_id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_channel_activations_persist() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = repository(&tmp, clock.clone());
        let channel = ChannelId::new("c1");

        repo.activate_channel(&channel, &PersonalityId::new("aria"), &UserId::new("mod"))
            .await
            .unwrap();
        repo.activate_channel(&channel, &PersonalityId::new("bard"), &UserId::new("mod"))
            .await
            .unwrap();

        let reopened = repository(&tmp, clock.clone());
        let activation = reopened.get_channel_activation(&channel).await.unwrap().unwrap();
        assert_eq!(activation.personality_id.as_str(), "bard");
        assert_eq!(reopened.list_channel_activations().await.unwrap().len(), 1);

        assert!(reopened.deactivate_channel(&channel).await.unwrap());
        assert!(!reopened.deactivate_channel(&channel).await.unwrap());
        assert!(reopened.get_channel_activation(&channel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_and_delete() {
        let tmp = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let repo = repository(&tmp, clock.clone());

        let mut a = start("u1", "c1", &clock);
        say(&mut a, 1, &clock);
        let mut b = start("u2", "c1", &clock);
        b.end(clock.as_ref()).unwrap();
        repo.save(&mut a).await.unwrap();
        repo.save(&mut b).await.unwrap();

        let stats = repo.get_stats().await.unwrap();
        assert_eq!(
            stats,
            ConversationStats { total: 2, active: 1, ended: 1, messages: 3, channel_activations: 0 }
        );

        assert!(repo.delete(&a.conversation_id()).await.unwrap());
        assert!(!repo.delete(&a.conversation_id()).await.unwrap());
        assert_eq!(repo.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_without_messages_is_hydration_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONVERSATIONS_FILE),
            r#"{ "conversations": { "u1-c1": { "id": "u1-c1", "userId": "u1", "channelId": "c1",
                 "activePersonalityId": "aria", "messages": [] } } }"#,
        )
        .unwrap();

        let repo = repository(&tmp, Arc::new(ManualClock::default()));
        let result = repo.find_by_id(&ConversationId::new("u1-c1")).await;
        assert!(matches!(result, Err(RepositoryError::Hydration { .. })));
    }
}
