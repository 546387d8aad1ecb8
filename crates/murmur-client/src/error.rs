use murmur_types::{MessageId, PeerId};
use thiserror::Error;

/// Failure reported by one of the session's collaborators (HTTP API, live
/// gateway).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("live transport error: {0}")]
    Transport(String),

    #[error("live channel closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("peer id must not be empty")]
    EmptyPeer,

    #[error("message text must not be empty")]
    EmptyMessage,

    #[error("no conversation is open")]
    NoActiveConversation,

    #[error("message addressed to {addressed} while the conversation with {active} is open")]
    PeerMismatch { addressed: PeerId, active: PeerId },

    #[error("history for {peer} arrived after a newer conversation was selected")]
    Superseded { peer: PeerId },

    #[error("failed to fetch history for {peer}: {source}")]
    FetchFailed {
        peer: PeerId,
        #[source]
        source: CollaboratorError,
    },

    #[error("message {id} was not stored: {source}")]
    SendFailed {
        id: MessageId,
        #[source]
        source: CollaboratorError,
    },

    #[error("live channel unavailable: {0}")]
    TransportUnavailable(#[source] CollaboratorError),

    #[error("no message {0} in the open conversation")]
    UnknownMessage(MessageId),

    #[error("message {0} has not failed")]
    NotRetryable(MessageId),
}

pub type Result<T> = std::result::Result<T, Error>;
