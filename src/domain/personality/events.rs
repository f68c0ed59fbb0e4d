use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::{AiModel, Alias, PersonalityConfiguration, PersonalityProfile};
use crate::event_sourcing::core::DomainEvent;

// ============================================================================
// Personality Events - Domain Events for Personality Aggregate
// ============================================================================

/// Personality Event - Union type for all personality events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PersonalityEvent {
    #[serde(rename = "PersonalityCreated")]
    Created(PersonalityCreated),
    #[serde(rename = "PersonalityProfileUpdated")]
    ProfileUpdated(PersonalityProfileUpdated),
    #[serde(rename = "PersonalityConfigurationUpdated")]
    ConfigurationUpdated(PersonalityConfigurationUpdated),
    #[serde(rename = "PersonalityAliasAdded")]
    AliasAdded(PersonalityAliasAdded),
    #[serde(rename = "PersonalityAliasRemoved")]
    AliasRemoved(PersonalityAliasRemoved),
    #[serde(rename = "PersonalityRemoved")]
    Removed(PersonalityRemoved),
}

impl DomainEvent for PersonalityEvent {
    const EVENT_TYPES: &'static [&'static str] = &[
        "PersonalityCreated",
        "PersonalityProfileUpdated",
        "PersonalityConfigurationUpdated",
        "PersonalityAliasAdded",
        "PersonalityAliasRemoved",
        "PersonalityRemoved",
    ];

    fn event_type(&self) -> &'static str {
        match self {
            PersonalityEvent::Created(_) => "PersonalityCreated",
            PersonalityEvent::ProfileUpdated(_) => "PersonalityProfileUpdated",
            PersonalityEvent::ConfigurationUpdated(_) => "PersonalityConfigurationUpdated",
            PersonalityEvent::AliasAdded(_) => "PersonalityAliasAdded",
            PersonalityEvent::AliasRemoved(_) => "PersonalityAliasRemoved",
            PersonalityEvent::Removed(_) => "PersonalityRemoved",
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Personality Created - Initial event in personality lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityCreated {
    pub personality_id: String,
    pub owner_id: String,
    pub profile: PersonalityProfile,
    pub model: AiModel,
    pub created_at: DateTime<Utc>,
}

/// Profile replaced by its updated form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityProfileUpdated {
    pub profile: PersonalityProfile,
    pub updated_at: DateTime<Utc>,
}

/// Configuration overrides replaced by their merged form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityConfigurationUpdated {
    pub configuration: PersonalityConfiguration,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityAliasAdded {
    pub alias: Alias,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityAliasRemoved {
    pub alias: Alias,
    pub removed_at: DateTime<Utc>,
}

/// Personality Removed - Soft delete, the record is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityRemoved {
    pub removed_at: DateTime<Utc>,
}
