use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use murmur_types::events::InboundMessage;
use murmur_types::{Message, MessageId, PeerId, UserId};
use tracing::{debug, info};

use crate::backend::{HistorySource, LiveChannel, MessageStore};
use crate::error::Result;
use crate::live::LiveFeed;
use crate::notify::Notifier;
use crate::reconciler::{Arrival, OutgoingMessage, Reconciler};

/// Async driver around a [`Reconciler`].
///
/// The reconciler sits behind a lock that is never held across an await, so
/// every operation lands atomically in the transcript even when fetches,
/// writes and live arrivals resolve concurrently.
pub struct ChatSession {
    local_user: UserId,
    state: Mutex<Reconciler>,
    history: Arc<dyn HistorySource>,
    store: Arc<dyn MessageStore>,
    live: Arc<dyn LiveChannel>,
    notifier: Arc<dyn Notifier>,
}

impl ChatSession {
    pub fn new(
        local_user: UserId,
        history: Arc<dyn HistorySource>,
        store: Arc<dyn MessageStore>,
        live: Arc<dyn LiveChannel>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            state: Mutex::new(Reconciler::new(local_user.clone())),
            local_user,
            history,
            store,
            live,
            notifier,
        }
    }

    fn state(&self) -> MutexGuard<'_, Reconciler> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    pub fn active_peer(&self) -> Option<PeerId> {
        self.state().active_peer().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.state().is_loading()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.state().snapshot()
    }

    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.state().get(id).cloned()
    }

    /// Open the conversation with `peer` and load its history.
    ///
    /// If another selection starts before this one's fetch resolves, this
    /// call returns [`Error::Superseded`](crate::Error::Superseded) and the
    /// transcript is left to the newer selection.
    pub async fn select_conversation(&self, peer: PeerId) -> Result<Vec<Message>> {
        let ticket = self.state().begin_selection(peer)?;
        let result = self
            .history
            .fetch_history(&self.local_user, &ticket.peer)
            .await;

        let mut state = self.state();
        state.complete_selection(ticket, result)?;
        Ok(state.snapshot())
    }

    /// Send `text` to `peer`, which must be the open conversation.
    ///
    /// The live emission and the local echo happen before this future first
    /// yields; it then waits for the durable write. A failed write leaves the
    /// echo marked failed and returns [`Error::SendFailed`](crate::Error::SendFailed).
    pub async fn send_message(&self, peer: &PeerId, text: &str) -> Result<MessageId> {
        let outgoing = self.start_send(peer, text)?;
        self.finish_send(outgoing).await
    }

    /// First half of [`send_message`](Self::send_message): emit and append the
    /// pending echo without waiting for anything.
    pub fn start_send(&self, peer: &PeerId, text: &str) -> Result<OutgoingMessage> {
        self.state().send_message(peer, text, self.live.as_ref())
    }

    /// Second half of [`send_message`](Self::send_message): run the durable
    /// write and settle the echo.
    pub async fn finish_send(&self, outgoing: OutgoingMessage) -> Result<MessageId> {
        self.persist(outgoing).await
    }

    /// Re-run the durable write of a failed message.
    pub async fn retry(&self, id: MessageId) -> Result<MessageId> {
        let outgoing = self.state().retry(id)?;
        self.persist(outgoing).await
    }

    async fn persist(&self, outgoing: OutgoingMessage) -> Result<MessageId> {
        let result = self.store.persist(&outgoing.request).await;
        self.state().resolve_send(outgoing.id, result)?;
        Ok(outgoing.id)
    }

    /// Apply one live event, playing the notification cue if it was accepted.
    pub fn handle_remote(&self, event: InboundMessage) -> Arrival {
        let arrival = self.state().on_remote_arrival(event);
        if let Some(message) = arrival.accepted() {
            self.notifier.notify(message);
        }
        arrival
    }

    /// Drain the live feed until the connection closes. Returns how many
    /// events were accepted into a transcript.
    pub async fn run_live_feed(&self, mut feed: LiveFeed) -> usize {
        let mut accepted = 0;
        while let Some(event) = feed.recv().await {
            if let Some(message) = self.handle_remote(event).accepted() {
                debug!(id = %message.id, "live message accepted");
                accepted += 1;
            }
        }
        info!(accepted, "live feed closed");
        accepted
    }

    /// Drop the open conversation (view teardown).
    pub fn close(&self) {
        self.state().clear();
    }
}
