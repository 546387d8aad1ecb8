use std::sync::atomic::{AtomicUsize, Ordering};

use murmur_types::Message;

/// Cue played when a peer's message lands in the open conversation.
///
/// One handle lives for the whole session; it is invoked once per accepted
/// arrival and never for local echoes.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &Message);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _message: &Message) {}
}

/// Counts cues instead of playing them.
#[derive(Debug, Default)]
pub struct CountingNotifier {
    count: AtomicUsize,
}

impl CountingNotifier {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl Notifier for CountingNotifier {
    fn notify(&self, _message: &Message) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}
