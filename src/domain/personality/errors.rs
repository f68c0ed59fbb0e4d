use super::value_objects::ProfileMode;

// ============================================================================
// Personality Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PersonalityError {
    #[error("Personality {0} has been removed")]
    InvalidState(String),

    #[error("Alias already exists on this personality: {0}")]
    DuplicateAlias(String),

    #[error("Alias not found on this personality: {0}")]
    AliasNotFound(String),

    #[error("Invalid alias: {0:?}")]
    InvalidAlias(String),

    #[error("Cannot apply a {update} profile update to a {profile} profile")]
    ModeMismatch {
        profile: ProfileMode,
        update: ProfileMode,
    },

    #[error("{0}")]
    Validation(String),
}
