//! Error types for the realtime layer.

/// A wire frame that could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no kind")]
    MissingKind,

    #[error("malformed {kind} frame: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A failed call to the REST collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server rejected the session token.
    #[error("session is not authorized")]
    Unauthorized,

    #[error("no session credentials")]
    NoSession,

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("invalid request url: {0}")]
    Url(String),
}

impl ApiError {
    /// Whether the stored session should be discarded.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Failures surfaced to the user from an open conversation.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("message not delivered: {0}")]
    NotDelivered(#[source] ApiError),

    #[error("message is empty")]
    EmptyMessage,

    #[error("conversation is closed")]
    Closed,
}

/// Failures starting or driving a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no signed-in user")]
    NoCredentials,

    #[error("cannot open a conversation with yourself")]
    SelfConversation,

    #[error("counterpart user id is empty")]
    EmptyCounterpart,
}
