use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::Token;
use crate::event_sourcing::core::DomainEvent;

// ============================================================================
// Authentication Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AuthEvent {
    #[serde(rename = "UserAuthCreated")]
    Created(UserAuthCreated),
    #[serde(rename = "TokenAssigned")]
    TokenAssigned(TokenAssigned),
    #[serde(rename = "TokenRevoked")]
    TokenRevoked(TokenRevoked),
    #[serde(rename = "NsfwVerified")]
    NsfwVerified(NsfwVerified),
}

impl DomainEvent for AuthEvent {
    const EVENT_TYPES: &'static [&'static str] =
        &["UserAuthCreated", "TokenAssigned", "TokenRevoked", "NsfwVerified"];

    fn event_type(&self) -> &'static str {
        match self {
            AuthEvent::Created(_) => "UserAuthCreated",
            AuthEvent::TokenAssigned(_) => "TokenAssigned",
            AuthEvent::TokenRevoked(_) => "TokenRevoked",
            AuthEvent::NsfwVerified(_) => "NsfwVerified",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAuthCreated {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Replaces any previous token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAssigned {
    pub token: Token,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRevoked {
    pub revoked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NsfwVerified {
    pub verified_at: DateTime<Utc>,
}
