// ============================================================================
// Authentication Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    #[error("User {0} has no token")]
    NoToken(String),

    #[error("Token of user {0} is already revoked")]
    TokenRevoked(String),

    #[error("User {0} is already NSFW verified")]
    AlreadyVerified(String),

    #[error("Token value cannot be empty")]
    InvalidToken,

    #[error("{0}")]
    Validation(String),
}
