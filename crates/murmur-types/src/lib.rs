//! Shared domain and wire types for the murmur chat client.

pub mod api;
pub mod events;
pub mod models;

pub use models::{DeliveryStatus, Message, MessageId, Origin, PeerId, UserId};
