use parley_types::{ChatId, DecodeError};

/// Failures of the REST collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(#[from] DecodeError),
}

/// Conditions surfaced by the session. None of them is fatal.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Transport failed to establish or dropped. Not retried by the core.
    #[error("connection error: {0}")]
    Connection(String),

    /// Outbound action attempted without a live connection; the action is discarded.
    #[error("not connected")]
    NotConnected,

    /// Event for a chat that is no longer active. Logged, never surfaced.
    #[error("event for inactive chat {chat_id}")]
    StaleContext { chat_id: ChatId },

    /// Message post or profile upload failed; nothing was added to the store.
    #[error("send failed: {0}")]
    SendFailure(#[source] ApiError),

    /// Directory, chat or history fetch failed.
    #[error("fetch failed: {0}")]
    Fetch(#[source] ApiError),

    #[error("no active chat")]
    NoActiveChat,
}
