// ============================================================================
// Conversation Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversationError {
    #[error("Conversation {0} has ended")]
    Ended(String),

    #[error("Conversation {id} timed out after {idle_ms}ms of inactivity")]
    TimedOut { id: String, idle_ms: u64 },

    #[error("Message content cannot be empty")]
    EmptyMessage,

    #[error("Nothing to change")]
    NoChange,

    #[error("{0}")]
    Validation(String),
}
