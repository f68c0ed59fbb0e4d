//! Store configuration.

use serde::Deserialize;
use std::path::PathBuf;

use crate::domain::conversation::ConversationSettings;

/// Runtime configuration for the persona store.
///
/// Loaded from `PERSONA_*` environment variables, e.g.
/// `PERSONA_DATA_DIR=/var/lib/persona`.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding every JSON document
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Messages kept per conversation when persisting
    #[serde(default = "default_max_conversation_messages")]
    pub max_conversation_messages: usize,

    /// Conversation inactivity timeout
    #[serde(default = "default_conversation_timeout_ms")]
    pub conversation_timeout_ms: u64,

    /// Delay before an automatic reply is due
    #[serde(default = "default_auto_response_delay_ms")]
    pub auto_response_delay_ms: u64,

    /// Age after which an external profile is re-fetched
    #[serde(default = "default_profile_refresh_threshold_ms")]
    pub profile_refresh_threshold_ms: u64,

    /// Publish committed events on the in-process bus
    #[serde(default = "default_event_bus_enabled")]
    pub event_bus_enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_conversation_messages: default_max_conversation_messages(),
            conversation_timeout_ms: default_conversation_timeout_ms(),
            auto_response_delay_ms: default_auto_response_delay_ms(),
            profile_refresh_threshold_ms: default_profile_refresh_threshold_ms(),
            event_bus_enabled: default_event_bus_enabled(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("PERSONA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Settings given to newly started conversations
    pub fn conversation_settings(&self) -> ConversationSettings {
        ConversationSettings {
            auto_response_delay_ms: self.auto_response_delay_ms,
            timeout_ms: self.conversation_timeout_ms,
            ..ConversationSettings::default()
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_conversation_messages() -> usize {
    100
}

fn default_conversation_timeout_ms() -> u64 {
    30 * 60 * 1_000
}

fn default_auto_response_delay_ms() -> u64 {
    8_000
}

fn default_profile_refresh_threshold_ms() -> u64 {
    60 * 60 * 1_000
}

fn default_event_bus_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.max_conversation_messages, 100);
        assert_eq!(config.conversation_timeout_ms, 1_800_000);
        assert_eq!(config.auto_response_delay_ms, 8_000);
        assert_eq!(config.profile_refresh_threshold_ms, 3_600_000);
        assert!(config.event_bus_enabled);
    }

    #[test]
    fn test_empty_source_uses_defaults() {
        let config: StoreConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.max_conversation_messages, 100);
    }

    #[test]
    fn test_conversation_settings_follow_config() {
        let config = StoreConfig { conversation_timeout_ms: 5_000, ..StoreConfig::default() };
        let settings = config.conversation_settings();
        assert_eq!(settings.timeout_ms, 5_000);
        assert_eq!(settings.auto_response_delay_ms, 8_000);
        assert!(!settings.auto_response_enabled);
    }

    #[test]
    fn test_refresh_threshold_gates_external_profiles() {
        use crate::domain::personality::{
            AiModel, ExternalProfile, Personality, PersonalityId, PersonalityProfile, UserId,
        };
        use crate::utils::{Clock, ManualClock};

        let config = StoreConfig::default();
        let clock = ManualClock::default();
        let profile = PersonalityProfile::External(ExternalProfile {
            last_fetched_at: Some(clock.now()),
            ..ExternalProfile::default()
        });
        let personality = Personality::create(
            PersonalityId::new("remote"),
            UserId::new("u1"),
            profile,
            AiModel::default(),
            &clock,
        )
        .unwrap();

        clock.advance_ms(config.profile_refresh_threshold_ms as i64);
        assert!(!personality.needs_profile_refresh(config.profile_refresh_threshold_ms, &clock));

        clock.advance_ms(1);
        assert!(personality.needs_profile_refresh(config.profile_refresh_threshold_ms, &clock));
    }
}
