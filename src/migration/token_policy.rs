use chrono::{DateTime, Utc};

use crate::domain::authentication::Token;

// ============================================================================
// Token Selection Policy
// ============================================================================
//
// When a user had several tokens in a legacy store, exactly one survives:
// 1. Revoked and expired candidates are dropped
// 2. The greatest createdAt wins; savedAt stands in when createdAt is absent
// 3. Candidates with neither timestamp rank below every dated one
// 4. Ties keep the candidate seen first
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCandidate {
    pub value: String,
    pub created_at: Option<DateTime<Utc>>,
    pub saved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl TokenCandidate {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            created_at: None,
            saved_at: None,
            expires_at: None,
            revoked: false,
        }
    }

    fn rank(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.saved_at)
    }

    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.revoked
            && !self.value.trim().is_empty()
            && !self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn into_token(self) -> Token {
        Token {
            created_at: self.rank(),
            value: self.value,
            expires_at: self.expires_at,
            revoked: false,
        }
    }
}

pub fn select_token(
    candidates: impl IntoIterator<Item = TokenCandidate>,
    now: DateTime<Utc>,
) -> Option<TokenCandidate> {
    let mut best: Option<TokenCandidate> = None;

    for candidate in candidates.into_iter().filter(|c| c.is_usable(now)) {
        let better = match &best {
            None => true,
            // Option orders None below Some, so undated candidates rank lowest
            Some(current) => candidate.rank() > current.rank(),
        };
        if better {
            best = Some(candidate);
        }
    }

    best
}
