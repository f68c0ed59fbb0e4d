use chrono::{DateTime, Utc};

use super::errors::ConversationError;
use super::events::*;
use super::value_objects::*;
use crate::domain::personality::{PersonalityId, UserId};
use crate::event_sourcing::core::{AggregateRoot, RootState};
use crate::utils::{elapsed_ms, Clock};

// ============================================================================
// Conversation Aggregate - Domain Logic
// ============================================================================
//
// Timeout is never stored: it is derived from last_activity_at and
// settings.timeout_ms whenever it is asked for. A write that finds the
// conversation timed out ends it (reason "timeout") and then fails.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct Conversation {
    pub(super) root: RootState<ConversationEvent>,

    pub(super) user_id: UserId,
    pub(super) channel_id: ChannelId,
    pub(super) messages: Vec<Message>,
    pub(super) active_personality_id: PersonalityId,
    pub(super) settings: ConversationSettings,

    pub(super) started_at: DateTime<Utc>,
    pub(super) last_activity_at: DateTime<Utc>,
    pub(super) ended: bool,
    pub(super) ended_at: Option<DateTime<Utc>>,
    pub(super) end_reason: Option<EndReason>,
}

impl Conversation {
    /// Factory: the initial message's author and channel are the participants
    pub fn start(
        id: ConversationId,
        initial_message: Message,
        personality_id: PersonalityId,
        settings: ConversationSettings,
        clock: &dyn Clock,
    ) -> Result<Self, ConversationError> {
        if id.as_str().trim().is_empty() {
            return Err(ConversationError::Validation("Conversation id is required".to_string()));
        }
        if personality_id.as_str().trim().is_empty() {
            return Err(ConversationError::Validation("Personality id is required".to_string()));
        }
        if initial_message.content.trim().is_empty() {
            return Err(ConversationError::EmptyMessage);
        }

        let now = clock.now();
        let user_id = UserId::new(initial_message.author_id.clone());
        let channel_id = ChannelId::new(initial_message.channel_id.clone());

        let mut conversation = Self {
            root: RootState::new(id.as_str()),
            user_id: user_id.clone(),
            channel_id: channel_id.clone(),
            messages: Vec::new(),
            active_personality_id: personality_id.clone(),
            settings: settings.clone(),
            started_at: now,
            last_activity_at: now,
            ended: false,
            ended_at: None,
            end_reason: None,
        };

        conversation.raise(
            ConversationEvent::Started(ConversationStarted {
                conversation_id: id.0,
                user_id: user_id.0,
                channel_id: channel_id.0,
                personality_id: personality_id.0,
                initial_message,
                settings,
                started_at: now,
            }),
            now,
        );

        Ok(conversation)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Append a message. A timed-out conversation is ended first and the add
    /// fails; the caller should still save to persist the end.
    pub fn add_message(&mut self, message: Message, clock: &dyn Clock) -> Result<(), ConversationError> {
        self.ensure_open()?;

        let now = clock.now();
        if self.is_timed_out(clock) {
            let idle_ms = elapsed_ms(self.last_activity_at, now);
            tracing::debug!(
                conversation_id = %self.aggregate_id(),
                idle_ms,
                "Conversation timed out on write"
            );
            self.raise(
                ConversationEvent::Ended(ConversationEnded { reason: EndReason::Timeout, ended_at: now }),
                now,
            );
            return Err(ConversationError::TimedOut {
                id: self.aggregate_id().to_string(),
                idle_ms,
            });
        }

        if message.content.trim().is_empty() {
            return Err(ConversationError::EmptyMessage);
        }

        self.raise(ConversationEvent::MessageAdded(MessageAdded { message, added_at: now }), now);
        Ok(())
    }

    pub fn assign_personality(
        &mut self,
        personality_id: PersonalityId,
        clock: &dyn Clock,
    ) -> Result<(), ConversationError> {
        self.ensure_open()?;
        if personality_id == self.active_personality_id {
            return Err(ConversationError::NoChange);
        }

        let now = clock.now();
        self.raise(
            ConversationEvent::PersonalityAssigned(PersonalityAssigned {
                personality_id: personality_id.0,
                previous_personality_id: self.active_personality_id.to_string(),
                assigned_at: now,
            }),
            now,
        );
        Ok(())
    }

    pub fn update_settings(
        &mut self,
        update: SettingsUpdate,
        clock: &dyn Clock,
    ) -> Result<(), ConversationError> {
        self.ensure_open()?;

        let settings = self.settings.merged(&update);
        if settings == self.settings {
            return Err(ConversationError::NoChange);
        }

        let now = clock.now();
        self.raise(
            ConversationEvent::SettingsUpdated(ConversationSettingsUpdated { settings, updated_at: now }),
            now,
        );
        Ok(())
    }

    pub fn end(&mut self, clock: &dyn Clock) -> Result<(), ConversationError> {
        self.ensure_open()?;

        let now = clock.now();
        self.raise(
            ConversationEvent::Ended(ConversationEnded { reason: EndReason::Manual, ended_at: now }),
            now,
        );
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), ConversationError> {
        if self.ended {
            return Err(ConversationError::Ended(self.aggregate_id().to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn conversation_id(&self) -> ConversationId {
        ConversationId::new(self.aggregate_id())
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn active_personality_id(&self) -> &PersonalityId {
        &self.active_personality_id
    }

    pub fn settings(&self) -> &ConversationSettings {
        &self.settings
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    /// Strictly more than `timeout_ms` since the last activity
    pub fn is_timed_out(&self, clock: &dyn Clock) -> bool {
        self.settings.timeout_ms > 0
            && elapsed_ms(self.last_activity_at, clock.now()) > self.settings.timeout_ms
    }

    /// Trigger condition for an automatic reply. Pure; nothing is scheduled.
    pub fn should_auto_respond(&self, clock: &dyn Clock) -> bool {
        if !self.settings.auto_response_enabled || self.ended {
            return false;
        }

        match self.messages.last() {
            None => false,
            Some(last) if last.is_from_personality => false,
            Some(last) => elapsed_ms(last.timestamp, clock.now()) >= self.settings.auto_response_delay_ms,
        }
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl AggregateRoot for Conversation {
    type Event = ConversationEvent;
    type Error = ConversationError;

    fn root(&self) -> &RootState<ConversationEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut RootState<ConversationEvent> {
        &mut self.root
    }

    fn when(&mut self, event: &ConversationEvent) {
        match event {
            ConversationEvent::Started(e) => {
                self.user_id = UserId::new(e.user_id.clone());
                self.channel_id = ChannelId::new(e.channel_id.clone());
                self.active_personality_id = PersonalityId::new(e.personality_id.clone());
                self.settings = e.settings.clone();
                self.messages = vec![e.initial_message.clone()];
                self.started_at = e.started_at;
                self.last_activity_at = e.started_at;
            }
            ConversationEvent::MessageAdded(e) => {
                self.messages.push(e.message.clone());
                self.last_activity_at = e.added_at;
            }
            ConversationEvent::PersonalityAssigned(e) => {
                self.active_personality_id = PersonalityId::new(e.personality_id.clone());
            }
            ConversationEvent::SettingsUpdated(e) => {
                self.settings = e.settings.clone();
            }
            ConversationEvent::Ended(e) => {
                self.ended = true;
                self.ended_at = Some(e.ended_at);
                self.end_reason = Some(e.reason);
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
