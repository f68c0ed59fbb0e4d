use chrono::{DateTime, Utc};

use super::errors::PersonalityError;
use super::events::*;
use super::value_objects::*;
use crate::event_sourcing::core::{AggregateRoot, RootState};
use crate::utils::{elapsed_ms, Clock};

// ============================================================================
// Personality Aggregate - Domain Logic
// ============================================================================

#[derive(Debug, Clone)]
pub struct Personality {
    pub(super) root: RootState<PersonalityEvent>,

    // Current State (derived from events)
    pub(super) owner_id: UserId,
    pub(super) profile: PersonalityProfile,
    pub(super) model: AiModel,
    pub(super) configuration: Option<PersonalityConfiguration>,
    pub(super) aliases: Vec<Alias>,
    pub(super) removed: bool,

    // Audit Trail
    pub(super) created_at: DateTime<Utc>,
    pub(super) updated_at: DateTime<Utc>,
    pub(super) removed_at: Option<DateTime<Utc>>,
}

impl Personality {
    /// Factory: validates identity, then applies `PersonalityCreated`
    pub fn create(
        id: PersonalityId,
        owner_id: UserId,
        profile: PersonalityProfile,
        model: AiModel,
        clock: &dyn Clock,
    ) -> Result<Self, PersonalityError> {
        if id.as_str().trim().is_empty() {
            return Err(PersonalityError::Validation("Personality id is required".to_string()));
        }
        if owner_id.as_str().trim().is_empty() {
            return Err(PersonalityError::Validation("Owner id is required".to_string()));
        }

        let now = clock.now();
        let mut personality = Self {
            root: RootState::new(id.as_str()),
            owner_id: owner_id.clone(),
            profile: profile.clone(),
            model: model.clone(),
            configuration: None,
            aliases: Vec::new(),
            removed: false,
            created_at: now,
            updated_at: now,
            removed_at: None,
        };

        personality.raise(
            PersonalityEvent::Created(PersonalityCreated {
                personality_id: id.0,
                owner_id: owner_id.0,
                profile,
                model,
                created_at: now,
            }),
            now,
        );

        Ok(personality)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub fn update_profile(
        &mut self,
        update: ProfileUpdate,
        clock: &dyn Clock,
    ) -> Result<(), PersonalityError> {
        self.ensure_active()?;

        let now = clock.now();
        let profile = self.profile.updated(&update, now)?;

        self.raise(
            PersonalityEvent::ProfileUpdated(PersonalityProfileUpdated { profile, updated_at: now }),
            now,
        );
        Ok(())
    }

    pub fn update_configuration(
        &mut self,
        update: PersonalityConfiguration,
        clock: &dyn Clock,
    ) -> Result<(), PersonalityError> {
        self.ensure_active()?;

        let now = clock.now();
        let configuration = self
            .configuration
            .clone()
            .unwrap_or_default()
            .merged(&update);

        self.raise(
            PersonalityEvent::ConfigurationUpdated(PersonalityConfigurationUpdated {
                configuration,
                updated_at: now,
            }),
            now,
        );
        Ok(())
    }

    /// Only this personality's own aliases are checked here; cross-personality
    /// collisions are resolved by the repository's alias index.
    pub fn add_alias(&mut self, alias: &str, clock: &dyn Clock) -> Result<(), PersonalityError> {
        self.ensure_active()?;

        let alias = Alias::new(alias)?;
        if self.has_alias(&alias.value) {
            return Err(PersonalityError::DuplicateAlias(alias.original_case));
        }

        let now = clock.now();
        self.raise(
            PersonalityEvent::AliasAdded(PersonalityAliasAdded { alias, added_at: now }),
            now,
        );
        Ok(())
    }

    pub fn remove_alias(&mut self, alias: &str, clock: &dyn Clock) -> Result<(), PersonalityError> {
        self.ensure_active()?;

        let existing = self
            .aliases
            .iter()
            .find(|a| a.matches(alias))
            .cloned()
            .ok_or_else(|| PersonalityError::AliasNotFound(alias.trim().to_string()))?;

        let now = clock.now();
        self.raise(
            PersonalityEvent::AliasRemoved(PersonalityAliasRemoved { alias: existing, removed_at: now }),
            now,
        );
        Ok(())
    }

    pub fn remove(&mut self, clock: &dyn Clock) -> Result<(), PersonalityError> {
        self.ensure_active()?;

        let now = clock.now();
        self.raise(PersonalityEvent::Removed(PersonalityRemoved { removed_at: now }), now);
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), PersonalityError> {
        if self.removed {
            return Err(PersonalityError::InvalidState(self.aggregate_id().to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn personality_id(&self) -> PersonalityId {
        PersonalityId::new(self.aggregate_id())
    }

    pub fn owner_id(&self) -> &UserId {
        &self.owner_id
    }

    pub fn profile(&self) -> &PersonalityProfile {
        &self.profile
    }

    pub fn model(&self) -> &AiModel {
        &self.model
    }

    pub fn configuration(&self) -> Option<&PersonalityConfiguration> {
        self.configuration.as_ref()
    }

    pub fn aliases(&self) -> &[Alias] {
        &self.aliases
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a.matches(alias))
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn removed_at(&self) -> Option<DateTime<Utc>> {
        self.removed_at
    }

    /// Display name, falling back to the id for external profiles not yet fetched
    pub fn display_name(&self) -> &str {
        self.profile.display_name().unwrap_or_else(|| self.aggregate_id())
    }

    /// External profiles only: true when never fetched or fetched longer
    /// than `threshold_ms` ago. Local profiles never need a refresh.
    pub fn needs_profile_refresh(&self, threshold_ms: u64, clock: &dyn Clock) -> bool {
        match &self.profile {
            PersonalityProfile::Local(_) => false,
            PersonalityProfile::External(profile) => match profile.last_fetched_at {
                None => true,
                Some(fetched_at) => elapsed_ms(fetched_at, clock.now()) > threshold_ms,
            },
        }
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl AggregateRoot for Personality {
    type Event = PersonalityEvent;
    type Error = PersonalityError;

    fn root(&self) -> &RootState<PersonalityEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut RootState<PersonalityEvent> {
        &mut self.root
    }

    fn when(&mut self, event: &PersonalityEvent) {
        match event {
            PersonalityEvent::Created(e) => {
                self.owner_id = UserId::new(e.owner_id.clone());
                self.profile = e.profile.clone();
                self.model = e.model.clone();
                self.created_at = e.created_at;
                self.updated_at = e.created_at;
            }
            PersonalityEvent::ProfileUpdated(e) => {
                self.profile = e.profile.clone();
                self.updated_at = e.updated_at;
            }
            PersonalityEvent::ConfigurationUpdated(e) => {
                self.configuration = Some(e.configuration.clone());
                self.updated_at = e.updated_at;
            }
            PersonalityEvent::AliasAdded(e) => {
                self.aliases.push(e.alias.clone());
                self.updated_at = e.added_at;
            }
            PersonalityEvent::AliasRemoved(e) => {
                self.aliases.retain(|a| a.value != e.alias.value);
                self.updated_at = e.removed_at;
            }
            PersonalityEvent::Removed(e) => {
                self.removed = true;
                self.removed_at = Some(e.removed_at);
                self.updated_at = e.removed_at;
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
