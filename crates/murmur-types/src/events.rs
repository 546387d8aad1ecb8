use serde::{Deserialize, Serialize};

use crate::models::{PeerId, UserId};

/// Commands sent FROM client TO the live gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LiveCommand {
    /// Register this connection as the user's delivery endpoint
    AddUser {
        #[serde(rename = "userId")]
        user_id: UserId,
    },

    /// Relay a message to a peer's open connection
    MessageSend {
        to: PeerId,
        from: UserId,
        message: String,
    },
}

/// Events pushed by the live gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LiveEvent {
    /// A peer sent us a message
    #[serde(rename = "msg-recieve")]
    MessageReceive(InboundMessage),

    /// Anything this client does not understand
    #[serde(other)]
    Unknown,
}

/// Payload of an inbound message event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: PeerId,
    pub message: String,
    /// Delivery id, when the gateway attaches one. Redeliveries reuse it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl InboundMessage {
    pub fn new(from: impl Into<PeerId>, message: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            message: message.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}
