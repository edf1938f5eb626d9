use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Failures of the relay core. Only `RejectedConnection` ends a connection;
/// every other variant drops the triggering event and the socket stays open.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("connection rejected: {0}")]
    RejectedConnection(Rejection),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("forbidden: {0}")]
    ForbiddenAction(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("anonymous connection")]
    Unauthenticated,
    #[error("not a participant of the room")]
    Unauthorized,
}

impl Rejection {
    /// Websocket close code sent to the client.
    pub fn close_code(&self) -> u16 {
        match self {
            Rejection::Unauthenticated => 4401,
            Rejection::Unauthorized => 4403,
        }
    }
}

impl ChatError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ChatError::MalformedEvent(msg.into())
    }

    /// Emits the event at the level its category calls for.
    pub(crate) fn log(&self, conn_id: uuid::Uuid) {
        match self {
            ChatError::RejectedConnection(_) => tracing::info!(%conn_id, "{self}"),
            ChatError::MalformedEvent(_) => tracing::debug!(%conn_id, "{self}"),
            ChatError::ForbiddenAction(_) | ChatError::NotFound(_) => {
                tracing::warn!(%conn_id, "{self}")
            }
            ChatError::Persistence(_) => tracing::error!(%conn_id, "{self}"),
        }
    }
}
