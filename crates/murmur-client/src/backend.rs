//! Seams between the session and the outside world.
//!
//! The session never talks to the network directly; it goes through these
//! traits so the HTTP/WebSocket implementations in [`crate::http`] and
//! [`crate::live`] can be swapped for in-memory doubles.

use async_trait::async_trait;
use murmur_types::api::{HistoryEntry, SendMessageRequest};
use murmur_types::events::LiveCommand;
use murmur_types::{PeerId, UserId};

use crate::error::CollaboratorError;

/// Request/response source of persisted conversation history.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(
        &self,
        from: &UserId,
        to: &PeerId,
    ) -> Result<Vec<HistoryEntry>, CollaboratorError>;
}

/// Durable half of a send.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn persist(&self, request: &SendMessageRequest) -> Result<(), CollaboratorError>;
}

/// Low-latency half of a send. Fire-and-forget: `Ok` means the command was
/// queued, not that anybody received it.
pub trait LiveChannel: Send + Sync {
    fn emit(&self, command: LiveCommand) -> Result<(), CollaboratorError>;
}
