use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::personality::{PersonalityId, UserId};

// ============================================================================
// Conversation Value Objects
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation identifier, one per (user, channel) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn for_participants(user_id: &UserId, channel_id: &ChannelId) -> Self {
        Self(format!("{}-{}", user_id, channel_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub author_id: String,
    pub channel_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_from_personality: bool,
}

impl Message {
    /// Message written by a user
    pub fn from_user(
        id: impl Into<String>,
        author: &UserId,
        channel: &ChannelId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            author_id: author.to_string(),
            channel_id: channel.to_string(),
            content: content.into(),
            timestamp,
            is_from_personality: false,
        }
    }

    /// Reply produced by the active personality
    pub fn from_personality(
        id: impl Into<String>,
        personality: &PersonalityId,
        channel: &ChannelId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            author_id: personality.to_string(),
            channel_id: channel.to_string(),
            content: content.into(),
            timestamp,
            is_from_personality: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSettings {
    pub auto_response_enabled: bool,
    pub auto_response_delay_ms: u64,
    pub mention_only: bool,
    /// Inactivity window; 0 disables the timeout
    pub timeout_ms: u64,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            auto_response_enabled: false,
            auto_response_delay_ms: 8_000,
            mention_only: false,
            timeout_ms: 30 * 60 * 1_000,
        }
    }
}

impl ConversationSettings {
    pub fn merged(&self, update: &SettingsUpdate) -> ConversationSettings {
        ConversationSettings {
            auto_response_enabled: update.auto_response_enabled.unwrap_or(self.auto_response_enabled),
            auto_response_delay_ms: update.auto_response_delay_ms.unwrap_or(self.auto_response_delay_ms),
            mention_only: update.mention_only.unwrap_or(self.mention_only),
            timeout_ms: update.timeout_ms.unwrap_or(self.timeout_ms),
        }
    }
}

/// Partial settings change; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub auto_response_enabled: Option<bool>,
    pub auto_response_delay_ms: Option<u64>,
    pub mention_only: Option<bool>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Manual,
    Timeout,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::Manual => f.write_str("manual"),
            EndReason::Timeout => f.write_str("timeout"),
        }
    }
}

/// A personality bound to a whole channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelActivation {
    pub channel_id: ChannelId,
    pub personality_id: PersonalityId,
    pub activated_by: UserId,
    pub activated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_is_deterministic() {
        let id = ConversationId::for_participants(&UserId::new("u1"), &ChannelId::new("c9"));
        assert_eq!(id.as_str(), "u1-c9");
        assert_eq!(id, ConversationId::for_participants(&UserId::new("u1"), &ChannelId::new("c9")));
    }

    #[test]
    fn test_settings_merge() {
        let settings = ConversationSettings::default();
        let merged = settings.merged(&SettingsUpdate {
            auto_response_enabled: Some(true),
            timeout_ms: Some(1_000),
            ..Default::default()
        });

        assert!(merged.auto_response_enabled);
        assert_eq!(merged.timeout_ms, 1_000);
        assert_eq!(merged.auto_response_delay_ms, settings.auto_response_delay_ms);
        assert!(!merged.mention_only);
    }

    #[test]
    fn test_end_reason_serializes_lowercase() {
        assert_eq!(serde_json::to_value(EndReason::Timeout).unwrap(), "timeout");
    }
}
