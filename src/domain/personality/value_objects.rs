use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::PersonalityError;

// ============================================================================
// Personality Value Objects
// ============================================================================

/// Personality identifier (the persona's unique name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonalityId(pub String);

impl PersonalityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonalityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chat platform user identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Alternate name for a personality.
///
/// `value` is the lower-cased lookup key; `original_case` is what the user
/// typed and what gets displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alias {
    pub value: String,
    pub original_case: String,
}

impl Alias {
    pub fn new(raw: &str) -> Result<Self, PersonalityError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PersonalityError::InvalidAlias(raw.to_string()));
        }

        Ok(Self {
            value: normalize_alias(trimmed),
            original_case: trimmed.to_string(),
        })
    }

    pub fn matches(&self, raw: &str) -> bool {
        self.value == normalize_alias(raw)
    }
}

/// Lookup key for an alias
pub fn normalize_alias(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Model the personality is bound to
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiModel {
    pub name: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
}

impl AiModel {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            capabilities: ModelCapabilities::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCapabilities {
    #[serde(default)]
    pub supports_images: bool,
    #[serde(default)]
    pub supports_audio: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileMode {
    Local,
    External,
}

impl fmt::Display for ProfileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileMode::Local => f.write_str("local"),
            ProfileMode::External => f.write_str("external"),
        }
    }
}

/// Display/prompt data, in one of two disjoint shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum PersonalityProfile {
    /// Fully owned by this application
    Local(LocalProfile),
    /// Mirrored from the vendor API and refreshed periodically
    External(ExternalProfile),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalProfile {
    pub display_name: String,
    pub prompt: String,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub max_word_count: Option<u32>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl PersonalityProfile {
    pub fn mode(&self) -> ProfileMode {
        match self {
            PersonalityProfile::Local(_) => ProfileMode::Local,
            PersonalityProfile::External(_) => ProfileMode::External,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            PersonalityProfile::Local(p) => Some(p.display_name.as_str()),
            PersonalityProfile::External(p) => p.display_name.as_deref(),
        }
    }

    /// Profile after applying `update`; the update must target the same mode
    pub fn updated(
        &self,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<PersonalityProfile, PersonalityError> {
        match (self, update) {
            (PersonalityProfile::Local(current), ProfileUpdate::Local(u)) => {
                let mut next = current.clone();
                if let Some(display_name) = &u.display_name {
                    next.display_name = display_name.clone();
                }
                if let Some(prompt) = &u.prompt {
                    next.prompt = prompt.clone();
                }
                if let Some(model_path) = &u.model_path {
                    next.model_path = Some(model_path.clone());
                }
                if let Some(max_word_count) = u.max_word_count {
                    next.max_word_count = Some(max_word_count);
                }
                if let Some(avatar_url) = &u.avatar_url {
                    next.avatar_url = Some(avatar_url.clone());
                }
                Ok(PersonalityProfile::Local(next))
            }
            (PersonalityProfile::External(_), ProfileUpdate::External(data)) => {
                Ok(PersonalityProfile::External(ExternalProfile {
                    display_name: data.display_name.clone(),
                    avatar_url: data.avatar_url.clone(),
                    error_message: data.error_message.clone(),
                    last_fetched_at: Some(now),
                }))
            }
            (current, update) => Err(PersonalityError::ModeMismatch {
                profile: current.mode(),
                update: update.mode(),
            }),
        }
    }
}

/// Profile change request, tagged with the mode it is meant for
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileUpdate {
    /// User edits to a locally owned profile
    Local(LocalProfileUpdate),
    /// Fresh data fetched from the vendor API
    External(ExternalProfileData),
}

impl ProfileUpdate {
    pub fn mode(&self) -> ProfileMode {
        match self {
            ProfileUpdate::Local(_) => ProfileMode::Local,
            ProfileUpdate::External(_) => ProfileMode::External,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalProfileUpdate {
    pub display_name: Option<String>,
    pub prompt: Option<String>,
    pub model_path: Option<String>,
    pub max_word_count: Option<u32>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExternalProfileData {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub error_message: Option<String>,
}

/// Optional per-personality overrides
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityConfiguration {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_word_count: Option<u32>,
}

impl PersonalityConfiguration {
    /// Overlay the `Some` fields of `update` onto this configuration
    pub fn merged(&self, update: &PersonalityConfiguration) -> PersonalityConfiguration {
        PersonalityConfiguration {
            prompt: update.prompt.clone().or_else(|| self.prompt.clone()),
            model: update.model.clone().or_else(|| self.model.clone()),
            max_word_count: update.max_word_count.or(self.max_word_count),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt.is_none() && self.model.is_none() && self.max_word_count.is_none()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> PersonalityProfile {
        PersonalityProfile::Local(LocalProfile {
            display_name: "Aria".to_string(),
            prompt: "You are Aria.".to_string(),
            model_path: None,
            max_word_count: Some(500),
            avatar_url: None,
        })
    }

    #[test]
    fn test_alias_normalizes_and_preserves_case() {
        let alias = Alias::new("  The Bard ").unwrap();
        assert_eq!(alias.value, "the bard");
        assert_eq!(alias.original_case, "The Bard");
        assert!(alias.matches("THE BARD"));
    }

    #[test]
    fn test_blank_alias_rejected() {
        assert!(matches!(Alias::new("   "), Err(PersonalityError::InvalidAlias(_))));
    }

    #[test]
    fn test_profile_serializes_with_mode_tag() {
        let json = serde_json::to_value(local()).unwrap();
        assert_eq!(json["mode"], "local");
        assert_eq!(json["displayName"], "Aria");

        let external = PersonalityProfile::External(ExternalProfile::default());
        let json = serde_json::to_value(&external).unwrap();
        assert_eq!(json["mode"], "external");
    }

    #[test]
    fn test_local_update_merges_fields() {
        let update = ProfileUpdate::Local(LocalProfileUpdate {
            prompt: Some("You are Aria, a poet.".to_string()),
            ..Default::default()
        });

        let next = local().updated(&update, Utc::now()).unwrap();
        match next {
            PersonalityProfile::Local(p) => {
                assert_eq!(p.display_name, "Aria");
                assert_eq!(p.prompt, "You are Aria, a poet.");
                assert_eq!(p.max_word_count, Some(500));
            }
            other => panic!("unexpected profile {other:?}"),
        }
    }

    #[test]
    fn test_external_data_on_local_profile_is_mode_mismatch() {
        let update = ProfileUpdate::External(ExternalProfileData::default());
        let result = local().updated(&update, Utc::now());

        assert!(matches!(
            result,
            Err(PersonalityError::ModeMismatch { profile: ProfileMode::Local, update: ProfileMode::External })
        ));
    }

    #[test]
    fn test_external_update_stamps_fetch_time() {
        let now = Utc::now();
        let profile = PersonalityProfile::External(ExternalProfile::default());
        let update = ProfileUpdate::External(ExternalProfileData {
            display_name: Some("Vendor Bot".to_string()),
            ..Default::default()
        });

        let next = profile.updated(&update, now).unwrap();
        assert_eq!(next.display_name(), Some("Vendor Bot"));
        match next {
            PersonalityProfile::External(p) => assert_eq!(p.last_fetched_at, Some(now)),
            other => panic!("unexpected profile {other:?}"),
        }
    }

    #[test]
    fn test_configuration_merge_keeps_unset_fields() {
        let base = PersonalityConfiguration {
            prompt: Some("base".to_string()),
            model: Some("m1".to_string()),
            max_word_count: None,
        };
        let update = PersonalityConfiguration {
            model: Some("m2".to_string()),
            max_word_count: Some(200),
            ..Default::default()
        };

        let merged = base.merged(&update);
        assert_eq!(merged.prompt.as_deref(), Some("base"));
        assert_eq!(merged.model.as_deref(), Some("m2"));
        assert_eq!(merged.max_word_count, Some(200));
    }
}
