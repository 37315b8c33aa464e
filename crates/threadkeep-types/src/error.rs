use thiserror::Error;

/// Errors surfaced by a `ThreadStore` implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Transport or connection failure; the store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store was reached but rejected or failed a command.
    #[error("command error: {0}")]
    Command(String),

    /// A command targeted a key holding a different kind of value.
    #[error("wrong type for key '{0}'")]
    WrongType(String),
}

/// Errors from chat threading operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat not found")]
    NotFound,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl ChatError {
    /// True when the error means "nothing there" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChatError::NotFound)
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => ChatError::StoreUnavailable(msg),
            other => ChatError::Store(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(err.to_string())
    }
}
