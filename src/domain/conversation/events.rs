use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::{ConversationSettings, EndReason, Message};
use crate::event_sourcing::core::DomainEvent;

// ============================================================================
// Conversation Events - Domain Events for Conversation Aggregate
// ============================================================================

/// Conversation Event - Union type for all conversation events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ConversationEvent {
    #[serde(rename = "ConversationStarted")]
    Started(ConversationStarted),
    #[serde(rename = "MessageAdded")]
    MessageAdded(MessageAdded),
    #[serde(rename = "PersonalityAssigned")]
    PersonalityAssigned(PersonalityAssigned),
    #[serde(rename = "ConversationSettingsUpdated")]
    SettingsUpdated(ConversationSettingsUpdated),
    #[serde(rename = "ConversationEnded")]
    Ended(ConversationEnded),
}

impl DomainEvent for ConversationEvent {
    const EVENT_TYPES: &'static [&'static str] = &[
        "ConversationStarted",
        "MessageAdded",
        "PersonalityAssigned",
        "ConversationSettingsUpdated",
        "ConversationEnded",
    ];

    fn event_type(&self) -> &'static str {
        match self {
            ConversationEvent::Started(_) => "ConversationStarted",
            ConversationEvent::MessageAdded(_) => "MessageAdded",
            ConversationEvent::PersonalityAssigned(_) => "PersonalityAssigned",
            ConversationEvent::SettingsUpdated(_) => "ConversationSettingsUpdated",
            ConversationEvent::Ended(_) => "ConversationEnded",
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Conversation Started - Initial event, carries the first message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStarted {
    pub conversation_id: String,
    pub user_id: String,
    pub channel_id: String,
    pub personality_id: String,
    pub initial_message: Message,
    pub settings: ConversationSettings,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAdded {
    pub message: Message,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityAssigned {
    pub personality_id: String,
    pub previous_personality_id: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSettingsUpdated {
    pub settings: ConversationSettings,
    pub updated_at: DateTime<Utc>,
}

/// Conversation Ended - Terminal event, manual or by inactivity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEnded {
    pub reason: EndReason,
    pub ended_at: DateTime<Utc>,
}
