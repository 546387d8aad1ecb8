//! Client core for one-to-one chat.
//!
//! - `reconciler` - the transcript state machine (history, local echoes, live arrivals)
//! - `session` - async driver tying the reconciler to its collaborators
//! - `http` / `live` - network implementations of those collaborators

pub mod backend;
pub mod error;
pub mod http;
pub mod live;
pub mod notify;
pub mod reconciler;
pub mod session;
pub mod transcript;

pub use backend::{HistorySource, LiveChannel, MessageStore};
pub use error::{CollaboratorError, Error, Result};
pub use http::HttpApi;
pub use live::{LiveFeed, LiveSender};
pub use notify::{CountingNotifier, NoopNotifier, Notifier};
pub use reconciler::{Arrival, OutgoingMessage, Reconciler};
pub use session::ChatSession;
