use serde::{Deserialize, Serialize};

use crate::models::{Origin, PeerId, UserId};

// -- History --

/// Body of the history fetch, keyed by the (local user, peer) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub from: UserId,
    pub to: PeerId,
}

/// One persisted message as the server returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "fromSelf")]
    pub from_self: bool,
    pub message: String,
}

impl HistoryEntry {
    pub fn origin(&self) -> Origin {
        if self.from_self {
            Origin::Local
        } else {
            Origin::Peer
        }
    }
}

/// The server wraps history in `{ "messages": [...] }`; some deployments
/// answer with the bare array instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistoryResponse {
    Wrapped { messages: Vec<HistoryEntry> },
    Bare(Vec<HistoryEntry>),
}

impl HistoryResponse {
    pub fn into_entries(self) -> Vec<HistoryEntry> {
        match self {
            Self::Wrapped { messages } => messages,
            Self::Bare(messages) => messages,
        }
    }
}

// -- Messages --

/// Body of the durable persistence call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub from: UserId,
    pub to: PeerId,
    pub message: String,
}
