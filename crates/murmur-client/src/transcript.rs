use chrono::Utc;
use murmur_types::api::HistoryEntry;
use murmur_types::{DeliveryStatus, Message, MessageId, Origin};

/// Ordered message list of one conversation.
///
/// Entries are only ever appended; the only in-place change is a delivery
/// status transition. Messages that show up before the history is known are
/// [`hold`](Transcript::hold)-ed aside and appended by
/// [`release_held`](Transcript::release_held), so nothing already visible
/// changes position. Ids come from a counter that survives [`clear`], so an id
/// is never reused for a different message.
///
/// [`clear`]: Transcript::clear
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    held: Vec<Message>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: String, origin: Origin, status: DeliveryStatus) -> &Message {
        let message = self.make(text, origin, status);
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Keep a message out of view until [`release_held`](Transcript::release_held).
    pub fn hold(&mut self, text: String, origin: Origin, status: DeliveryStatus) -> &Message {
        let message = self.make(text, origin, status);
        self.held.push(message);
        &self.held[self.held.len() - 1]
    }

    pub fn append_history(&mut self, entries: Vec<HistoryEntry>) {
        for entry in entries {
            let origin = entry.origin();
            let message = self.make(entry.message, origin, DeliveryStatus::Confirmed);
            self.messages.push(message);
        }
    }

    /// Append held messages in the order they were held.
    pub fn release_held(&mut self) -> usize {
        let released = self.held.len();
        self.messages.append(&mut self.held);
        released
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.held.clear();
    }

    /// Look up a visible or held message.
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .chain(self.held.iter())
            .find(|m| m.id == id)
    }

    pub fn set_status(&mut self, id: MessageId, status: DeliveryStatus) -> Option<&Message> {
        let message = self
            .messages
            .iter_mut()
            .rev()
            .chain(self.held.iter_mut())
            .find(|m| m.id == id)?;
        message.status = status;
        Some(message)
    }

    pub fn held(&self) -> &[Message] {
        &self.held
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn make(&mut self, text: String, origin: Origin, status: DeliveryStatus) -> Message {
        self.next_id += 1;
        Message {
            id: MessageId(self.next_id),
            text,
            origin,
            status,
            received_at: Utc::now(),
        }
    }
}
