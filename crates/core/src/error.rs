use thiserror::Error;

/// Failures surfaced by the session registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no live session for call '{0}'")]
    NotFound(String),
    #[error("a turn is already in progress for call '{0}'")]
    ConcurrentTurnRejected(String),
    #[error("call '{0}' has already ended")]
    CallEnded(String),
}

/// Failures from the language-model provider. All are recoverable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("model provider rate limit exceeded")]
    RateLimited,
    #[error("model call timed out")]
    Timeout,
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("model provider error: {0}")]
    Provider(String),
}

/// Failures from the transcript store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no call record for '{0}'")]
    NotFound(String),
    #[error("transcript store unavailable: {0}")]
    Unavailable(String),
}
