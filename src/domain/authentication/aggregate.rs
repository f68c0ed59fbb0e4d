use chrono::{DateTime, Utc};

use super::errors::AuthError;
use super::events::*;
use super::value_objects::*;
use crate::domain::personality::UserId;
use crate::event_sourcing::core::{AggregateRoot, RootState};
use crate::utils::Clock;

// ============================================================================
// UserAuth Aggregate - One Token and One NSFW Status Per User
// ============================================================================

#[derive(Debug, Clone)]
pub struct UserAuth {
    pub(super) root: RootState<AuthEvent>,
    pub(super) token: Option<Token>,
    pub(super) nsfw_status: NsfwStatus,
    pub(super) created_at: DateTime<Utc>,
    pub(super) updated_at: DateTime<Utc>,
}

impl UserAuth {
    pub fn create(user_id: UserId, clock: &dyn Clock) -> Result<Self, AuthError> {
        if user_id.as_str().trim().is_empty() {
            return Err(AuthError::Validation("User id is required".to_string()));
        }

        let now = clock.now();
        let mut auth = Self {
            root: RootState::new(user_id.as_str()),
            token: None,
            nsfw_status: NsfwStatus::default(),
            created_at: now,
            updated_at: now,
        };
        auth.raise(AuthEvent::Created(UserAuthCreated { user_id: user_id.0, created_at: now }), now);
        Ok(auth)
    }

    pub fn assign_token(
        &mut self,
        value: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        clock: &dyn Clock,
    ) -> Result<(), AuthError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let now = clock.now();
        self.raise(
            AuthEvent::TokenAssigned(TokenAssigned {
                token: Token::new(value, now, expires_at),
                assigned_at: now,
            }),
            now,
        );
        Ok(())
    }

    pub fn revoke_token(&mut self, clock: &dyn Clock) -> Result<(), AuthError> {
        match &self.token {
            None => Err(AuthError::NoToken(self.aggregate_id().to_string())),
            Some(token) if token.revoked => Err(AuthError::TokenRevoked(self.aggregate_id().to_string())),
            Some(_) => {
                let now = clock.now();
                self.raise(AuthEvent::TokenRevoked(TokenRevoked { revoked_at: now }), now);
                Ok(())
            }
        }
    }

    pub fn verify_nsfw(&mut self, clock: &dyn Clock) -> Result<(), AuthError> {
        if self.nsfw_status.verified {
            return Err(AuthError::AlreadyVerified(self.aggregate_id().to_string()));
        }

        let now = clock.now();
        self.raise(AuthEvent::NsfwVerified(NsfwVerified { verified_at: now }), now);
        Ok(())
    }

    pub fn user_id(&self) -> UserId {
        UserId::new(self.aggregate_id())
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn nsfw_status(&self) -> &NsfwStatus {
        &self.nsfw_status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn has_valid_token(&self, clock: &dyn Clock) -> bool {
        self.token.as_ref().is_some_and(|token| token.is_valid(clock.now()))
    }
}

impl AggregateRoot for UserAuth {
    type Event = AuthEvent;
    type Error = AuthError;

    fn root(&self) -> &RootState<AuthEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut RootState<AuthEvent> {
        &mut self.root
    }

    fn when(&mut self, event: &AuthEvent) {
        match event {
            AuthEvent::Created(e) => {
                self.created_at = e.created_at;
                self.updated_at = e.created_at;
            }
            AuthEvent::TokenAssigned(e) => {
                self.token = Some(e.token.clone());
                self.updated_at = e.assigned_at;
            }
            AuthEvent::TokenRevoked(e) => {
                if let Some(token) = self.token.as_mut() {
                    token.revoked = true;
                }
                self.updated_at = e.revoked_at;
            }
            AuthEvent::NsfwVerified(e) => {
                self.nsfw_status = NsfwStatus { verified: true, verified_at: Some(e.verified_at) };
                self.updated_at = e.verified_at;
            }
        }
    }
}
