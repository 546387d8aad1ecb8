//! Transcript reconciliation.
//!
//! Three producers feed one transcript: fetched history, local sends and
//! live arrivals. The [`Reconciler`] is the only writer. It performs no I/O
//! itself; the session hands it the results of fetches and persistence calls
//! and it decides whether they still apply.

use std::collections::{HashSet, VecDeque};

use murmur_types::api::{HistoryEntry, SendMessageRequest};
use murmur_types::events::{InboundMessage, LiveCommand};
use murmur_types::{DeliveryStatus, Message, MessageId, Origin, PeerId, UserId};
use tracing::{debug, info, warn};

use crate::backend::LiveChannel;
use crate::error::{CollaboratorError, Error, Result};
use crate::transcript::Transcript;

/// Handed out by [`Reconciler::begin_selection`]; a fetch result is only
/// applied when its ticket is still the latest one issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTicket {
    pub peer: PeerId,
    seq: u64,
}

/// A local echo waiting for its durable write.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub id: MessageId,
    pub request: SendMessageRequest,
}

/// How many delivery ids a conversation remembers for redelivery checks.
const SEEN_DELIVERY_LIMIT: usize = 512;

/// What happened to an inbound live event.
#[derive(Debug, Clone, PartialEq)]
pub enum Arrival {
    Appended(Message),
    /// Accepted while history is loading; appended once the history is in.
    Buffered(Message),
    /// Same delivery id already seen in this conversation.
    Duplicate,
    /// Not from the open conversation's peer.
    Ignored,
}

impl Arrival {
    /// The message that was accepted, if any.
    pub fn accepted(&self) -> Option<&Message> {
        match self {
            Self::Appended(message) | Self::Buffered(message) => Some(message),
            Self::Duplicate | Self::Ignored => None,
        }
    }
}

/// `Idle` with an open peer means its history could not be loaded; live
/// traffic is still appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Loading { seq: u64 },
    Active,
}

/// Most recent delivery ids, oldest evicted first.
#[derive(Debug, Default)]
struct RecentIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl RecentIds {
    /// Returns `false` if `id` is already remembered.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == SEEN_DELIVERY_LIMIT
            && let Some(oldest) = self.order.pop_front()
        {
            self.ids.remove(&oldest);
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}

pub struct Reconciler {
    local_user: UserId,
    active_peer: Option<PeerId>,
    phase: Phase,
    transcript: Transcript,
    latest_selection: u64,
    seen_deliveries: RecentIds,
}

impl Reconciler {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            active_peer: None,
            phase: Phase::Idle,
            transcript: Transcript::new(),
            latest_selection: 0,
            seen_deliveries: RecentIds::default(),
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    pub fn active_peer(&self) -> Option<&PeerId> {
        self.active_peer.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Loading { .. })
    }

    pub fn history_loaded(&self) -> bool {
        self.phase == Phase::Active
    }

    /// Visible messages, in display order. Messages held back while history
    /// loads are not part of it yet.
    pub fn transcript(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.transcript.messages().to_vec()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.transcript.get(id)
    }

    /// Switch to `peer`. The previous transcript is dropped right away so
    /// nothing from the old conversation is visible while history loads.
    pub fn begin_selection(&mut self, peer: PeerId) -> Result<SelectionTicket> {
        if peer.is_empty() {
            return Err(Error::EmptyPeer);
        }

        self.latest_selection += 1;
        let seq = self.latest_selection;

        debug!(%peer, seq, "selecting conversation");
        self.transcript.clear();
        self.seen_deliveries.clear();
        self.active_peer = Some(peer.clone());
        self.phase = Phase::Loading { seq };

        Ok(SelectionTicket { peer, seq })
    }

    /// Apply a history fetch. Results for anything but the latest selection
    /// are dropped with [`Error::Superseded`].
    ///
    /// Messages sent or received while the fetch was in flight are appended
    /// after the fetched history, in the order they arrived. They are also
    /// appended when the fetch failed, so nothing accepted is lost.
    pub fn complete_selection(
        &mut self,
        ticket: SelectionTicket,
        result: std::result::Result<Vec<HistoryEntry>, CollaboratorError>,
    ) -> Result<()> {
        let current = self.phase == Phase::Loading { seq: ticket.seq }
            && self.active_peer.as_ref() == Some(&ticket.peer);
        if !current {
            debug!(peer = %ticket.peer, seq = ticket.seq, "discarding stale history");
            return Err(Error::Superseded { peer: ticket.peer });
        }

        match result {
            Ok(entries) => {
                let count = entries.len();
                self.transcript.append_history(entries);
                let held = self.transcript.release_held();
                info!(peer = %ticket.peer, count, held, "history loaded");
                self.phase = Phase::Active;
                Ok(())
            }
            Err(source) => {
                let held = self.transcript.release_held();
                warn!(peer = %ticket.peer, error = %source, held, "history fetch failed");
                self.phase = Phase::Idle;
                Err(Error::FetchFailed {
                    peer: ticket.peer,
                    source,
                })
            }
        }
    }

    /// Emit `text` to `to` over the live channel and append it as a pending
    /// local echo. The caller persists [`OutgoingMessage::request`] and
    /// reports back through [`resolve_send`](Reconciler::resolve_send).
    ///
    /// Nothing is appended when the live channel refuses the command. While
    /// history is loading the echo is held back like a live arrival.
    pub fn send_message(
        &mut self,
        to: &PeerId,
        text: &str,
        live: &dyn LiveChannel,
    ) -> Result<OutgoingMessage> {
        let active = self.active_peer.clone().ok_or(Error::NoActiveConversation)?;
        if text.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }
        if *to != active {
            return Err(Error::PeerMismatch {
                addressed: to.clone(),
                active,
            });
        }

        live.emit(LiveCommand::MessageSend {
            to: active.clone(),
            from: self.local_user.clone(),
            message: text.to_string(),
        })
        .map_err(Error::TransportUnavailable)?;

        let id = if self.is_loading() {
            self.transcript
                .hold(text.to_string(), Origin::Local, DeliveryStatus::Pending)
                .id
        } else {
            self.transcript
                .push(text.to_string(), Origin::Local, DeliveryStatus::Pending)
                .id
        };
        debug!(%id, peer = %active, held = self.is_loading(), "local echo appended");

        Ok(OutgoingMessage {
            id,
            request: SendMessageRequest {
                from: self.local_user.clone(),
                to: active,
                message: text.to_string(),
            },
        })
    }

    /// Settle a pending echo once its durable write resolved.
    ///
    /// Returns `Ok(None)` when the message is no longer in the transcript
    /// (the user moved to another conversation meanwhile). A failed write is
    /// always reported, and the echo stays in place marked failed.
    pub fn resolve_send(
        &mut self,
        id: MessageId,
        result: std::result::Result<(), CollaboratorError>,
    ) -> Result<Option<Message>> {
        match result {
            Ok(()) => Ok(self
                .transcript
                .set_status(id, DeliveryStatus::Confirmed)
                .cloned()),
            Err(source) => {
                warn!(%id, error = %source, "message not stored");
                self.transcript.set_status(id, DeliveryStatus::Failed);
                Err(Error::SendFailed { id, source })
            }
        }
    }

    /// Put a failed echo back to pending and hand out its payload again.
    /// The message keeps its place and id; the live channel is not re-used.
    pub fn retry(&mut self, id: MessageId) -> Result<OutgoingMessage> {
        let active = self.active_peer.clone().ok_or(Error::NoActiveConversation)?;
        let message = self.transcript.get(id).ok_or(Error::UnknownMessage(id))?;
        if !message.is_local() || !message.is_failed() {
            return Err(Error::NotRetryable(id));
        }
        let text = message.text.clone();

        self.transcript.set_status(id, DeliveryStatus::Pending);
        debug!(%id, "retrying send");

        Ok(OutgoingMessage {
            id,
            request: SendMessageRequest {
                from: self.local_user.clone(),
                to: active,
                message: text,
            },
        })
    }

    /// Merge one live event. Only events from the open conversation's peer
    /// are accepted; everything else leaves the transcript untouched.
    pub fn on_remote_arrival(&mut self, event: InboundMessage) -> Arrival {
        if self.active_peer.as_ref() != Some(&event.from) {
            debug!(from = %event.from, "ignoring message for inactive conversation");
            return Arrival::Ignored;
        }

        if let Some(delivery) = &event.id
            && !self.seen_deliveries.insert(delivery)
        {
            debug!(from = %event.from, delivery = %delivery, "dropping redelivered message");
            return Arrival::Duplicate;
        }

        if self.is_loading() {
            let message = self
                .transcript
                .hold(event.message, Origin::Peer, DeliveryStatus::Confirmed)
                .clone();
            debug!(id = %message.id, "holding message until history is loaded");
            return Arrival::Buffered(message);
        }

        let message = self
            .transcript
            .push(event.message, Origin::Peer, DeliveryStatus::Confirmed)
            .clone();
        Arrival::Appended(message)
    }

    /// Forget the open conversation (view teardown).
    pub fn clear(&mut self) {
        self.latest_selection += 1;
        self.transcript.clear();
        self.seen_deliveries.clear();
        self.active_peer = None;
        self.phase = Phase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[derive(Default)]
    struct RecordingLive {
        sent: Mutex<Vec<LiveCommand>>,
        closed: AtomicBool,
    }

    impl LiveChannel for RecordingLive {
        fn emit(&self, command: LiveCommand) -> std::result::Result<(), CollaboratorError> {
            if self.closed.load(Ordering::Relaxed) {
                return Err(CollaboratorError::Closed);
            }
            self.sent.lock().unwrap().push(command);
            Ok(())
        }
    }

    fn entry(from_self: bool, text: &str) -> HistoryEntry {
        HistoryEntry {
            from_self,
            message: text.into(),
        }
    }

    fn server_error() -> CollaboratorError {
        CollaboratorError::Status {
            status: 500,
            body: "boom".into(),
        }
    }

    fn view(r: &Reconciler) -> Vec<(Origin, &str)> {
        r.transcript()
            .iter()
            .map(|m| (m.origin, m.text.as_str()))
            .collect()
    }

    fn opened(peer: &str, history: Vec<HistoryEntry>) -> Reconciler {
        let mut r = Reconciler::new("u1".into());
        let ticket = r.begin_selection(peer.into()).unwrap();
        r.complete_selection(ticket, Ok(history)).unwrap();
        r
    }

    #[test]
    fn scenario_history_send_arrival_and_foreign_arrival() {
        let live = RecordingLive::default();
        let mut r = opened("p1", vec![entry(true, "hi")]);
        assert_eq!(view(&r), [(Origin::Local, "hi")]);

        r.send_message(&"p1".into(), "yo", &live).unwrap();
        assert_eq!(view(&r), [(Origin::Local, "hi"), (Origin::Local, "yo")]);

        let arrival = r.on_remote_arrival(InboundMessage::new("p1", "hey"));
        assert!(matches!(arrival, Arrival::Appended(ref m) if m.text == "hey"));

        let before = r.snapshot();
        assert_eq!(
            r.on_remote_arrival(InboundMessage::new("p2", "ignored")),
            Arrival::Ignored
        );
        assert_eq!(r.snapshot(), before);
        assert_eq!(
            view(&r),
            [
                (Origin::Local, "hi"),
                (Origin::Local, "yo"),
                (Origin::Peer, "hey")
            ]
        );
    }

    #[test]
    fn send_emits_live_command_then_appends_pending_echo() {
        let live = RecordingLive::default();
        let mut r = opened("p1", vec![]);

        let out = r.send_message(&"p1".into(), "yo", &live).unwrap();

        assert_eq!(
            *live.sent.lock().unwrap(),
            [LiveCommand::MessageSend {
                to: "p1".into(),
                from: "u1".into(),
                message: "yo".into(),
            }]
        );
        assert_eq!(out.request.from, UserId::new("u1"));
        assert_eq!(out.request.to, PeerId::new("p1"));
        assert!(r.get(out.id).unwrap().is_pending());
    }

    #[test]
    fn interleaved_sends_and_arrivals_keep_call_order() {
        let live = RecordingLive::default();
        let mut r = opened("p1", vec![]);

        let a = r.send_message(&"p1".into(), "a", &live).unwrap();
        r.on_remote_arrival(InboundMessage::new("p1", "b"));
        let c = r.send_message(&"p1".into(), "c", &live).unwrap();
        r.on_remote_arrival(InboundMessage::new("p1", "d"));

        // durable writes settle in reverse order
        r.resolve_send(c.id, Ok(())).unwrap();
        r.resolve_send(a.id, Ok(())).unwrap();

        let texts: Vec<_> = r.transcript().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["a", "b", "c", "d"]);
        assert!(r.transcript().iter().all(|m| m.status == DeliveryStatus::Confirmed));
    }

    #[test]
    fn switching_peer_discards_previous_transcript() {
        let mut r = opened("pA", vec![entry(true, "a1"), entry(false, "a2")]);
        r.on_remote_arrival(InboundMessage::new("pA", "a3"));

        let ticket = r.begin_selection("pB".into()).unwrap();
        assert!(r.transcript().is_empty());

        r.complete_selection(ticket, Ok(vec![entry(false, "b1")])).unwrap();
        assert_eq!(view(&r), [(Origin::Peer, "b1")]);
    }

    #[test]
    fn late_history_for_previous_selection_is_discarded() {
        let mut r = Reconciler::new("u1".into());
        let a = r.begin_selection("pA".into()).unwrap();
        let b = r.begin_selection("pB".into()).unwrap();

        r.complete_selection(b, Ok(vec![entry(false, "from B")])).unwrap();
        let err = r
            .complete_selection(a, Ok(vec![entry(false, "from A")]))
            .unwrap_err();

        assert!(matches!(err, Error::Superseded { ref peer } if *peer == PeerId::new("pA")));
        assert_eq!(view(&r), [(Origin::Peer, "from B")]);
        assert_eq!(r.active_peer(), Some(&PeerId::new("pB")));
    }

    #[test]
    fn reselecting_same_peer_only_applies_latest_fetch() {
        let mut r = Reconciler::new("u1".into());
        let first = r.begin_selection("p1".into()).unwrap();
        let second = r.begin_selection("p1".into()).unwrap();

        r.complete_selection(second, Ok(vec![entry(true, "fresh")])).unwrap();
        assert!(r.complete_selection(first, Ok(vec![entry(true, "stale")])).is_err());
        assert_eq!(view(&r), [(Origin::Local, "fresh")]);
    }

    #[test]
    fn empty_peer_is_rejected() {
        let mut r = Reconciler::new("u1".into());
        assert!(matches!(r.begin_selection("".into()), Err(Error::EmptyPeer)));
        assert!(r.active_peer().is_none());
    }

    #[test]
    fn fetch_failure_is_surfaced_and_leaves_transcript_empty() {
        let mut r = opened("pA", vec![entry(true, "old")]);
        let ticket = r.begin_selection("pB".into()).unwrap();

        let err = r.complete_selection(ticket, Err(server_error())).unwrap_err();

        assert!(matches!(err, Error::FetchFailed { .. }));
        assert!(r.transcript().is_empty());
        assert!(!r.history_loaded());
        assert_eq!(r.active_peer(), Some(&PeerId::new("pB")));
    }

    #[test]
    fn arrivals_during_loading_are_held_until_history_lands() {
        let live = RecordingLive::default();
        let mut r = Reconciler::new("u1".into());
        let ticket = r.begin_selection("p1".into()).unwrap();

        let arrival = r.on_remote_arrival(InboundMessage::new("p1", "live-1"));
        assert!(matches!(arrival, Arrival::Buffered(ref m) if m.text == "live-1"));
        let echo = r.send_message(&"p1".into(), "live-2", &live).unwrap();
        assert!(r.snapshot().is_empty());
        assert!(r.get(echo.id).unwrap().is_pending());

        r.complete_selection(ticket, Ok(vec![entry(false, "old")])).unwrap();
        let after: Vec<_> = r.snapshot().into_iter().map(|m| (m.id, m.text)).collect();
        assert_eq!(
            after.iter().map(|(_, t)| t.as_str()).collect::<Vec<_>>(),
            ["old", "live-1", "live-2"]
        );

        // later appends never move what is already shown
        r.on_remote_arrival(InboundMessage::new("p1", "live-3"));
        let later: Vec<_> = r.snapshot().into_iter().map(|m| (m.id, m.text)).collect();
        assert_eq!(&later[..3], &after[..]);
    }

    #[test]
    fn held_messages_survive_a_failed_fetch() {
        let live = RecordingLive::default();
        let mut r = Reconciler::new("u1".into());
        let ticket = r.begin_selection("p1".into()).unwrap();
        r.on_remote_arrival(InboundMessage::new("p1", "early"));

        assert!(r.complete_selection(ticket, Err(server_error())).is_err());
        assert_eq!(view(&r), [(Origin::Peer, "early")]);

        r.send_message(&"p1".into(), "still here", &live).unwrap();
        assert!(matches!(
            r.on_remote_arrival(InboundMessage::new("p1", "reply")),
            Arrival::Appended(_)
        ));
        assert_eq!(
            view(&r),
            [
                (Origin::Peer, "early"),
                (Origin::Local, "still here"),
                (Origin::Peer, "reply")
            ]
        );
    }

    #[test]
    fn switching_while_loading_drops_held_messages() {
        let mut r = Reconciler::new("u1".into());
        r.begin_selection("pA".into()).unwrap();
        r.on_remote_arrival(InboundMessage::new("pA", "for A"));

        let ticket = r.begin_selection("pB".into()).unwrap();
        r.complete_selection(ticket, Ok(vec![])).unwrap();

        assert!(r.transcript().is_empty());
    }

    #[test]
    fn send_preconditions() {
        let live = RecordingLive::default();
        let mut r = Reconciler::new("u1".into());
        assert!(matches!(
            r.send_message(&"p1".into(), "yo", &live),
            Err(Error::NoActiveConversation)
        ));

        let mut r = opened("p1", vec![]);
        assert!(matches!(
            r.send_message(&"p1".into(), "   ", &live),
            Err(Error::EmptyMessage)
        ));
        assert!(matches!(
            r.send_message(&"p2".into(), "yo", &live),
            Err(Error::PeerMismatch { .. })
        ));
        assert!(live.sent.lock().unwrap().is_empty());
        assert!(r.transcript().is_empty());
    }

    #[test]
    fn closed_live_channel_appends_nothing() {
        let live = RecordingLive::default();
        live.closed.store(true, Ordering::Relaxed);
        let mut r = opened("p1", vec![]);

        let err = r.send_message(&"p1".into(), "yo", &live).unwrap_err();

        assert!(matches!(err, Error::TransportUnavailable(_)));
        assert!(r.transcript().is_empty());
    }

    #[test]
    fn failed_write_marks_echo_and_retry_restores_pending() {
        let live = RecordingLive::default();
        let mut r = opened("p1", vec![]);
        let out = r.send_message(&"p1".into(), "yo", &live).unwrap();

        let err = r.resolve_send(out.id, Err(server_error())).unwrap_err();
        assert!(matches!(err, Error::SendFailed { id, .. } if id == out.id));
        assert!(r.get(out.id).unwrap().is_failed());

        let again = r.retry(out.id).unwrap();
        assert_eq!(again.id, out.id);
        assert_eq!(again.request, out.request);
        assert!(r.get(out.id).unwrap().is_pending());
        assert_eq!(r.transcript().len(), 1);
        assert_eq!(live.sent.lock().unwrap().len(), 1);

        r.resolve_send(out.id, Ok(())).unwrap();
        assert_eq!(r.get(out.id).unwrap().status, DeliveryStatus::Confirmed);
    }

    #[test]
    fn only_failed_local_messages_are_retryable() {
        let live = RecordingLive::default();
        let mut r = opened("p1", vec![entry(false, "theirs")]);
        let theirs = r.transcript()[0].id;
        let mine = r.send_message(&"p1".into(), "mine", &live).unwrap().id;

        assert!(matches!(r.retry(theirs), Err(Error::NotRetryable(_))));
        assert!(matches!(r.retry(mine), Err(Error::NotRetryable(_))));
        assert!(matches!(r.retry(MessageId(404)), Err(Error::UnknownMessage(_))));
    }

    #[test]
    fn write_settling_after_switch_is_harmless() {
        let live = RecordingLive::default();
        let mut r = opened("pA", vec![]);
        let out = r.send_message(&"pA".into(), "yo", &live).unwrap();

        let ticket = r.begin_selection("pB".into()).unwrap();
        r.complete_selection(ticket, Ok(vec![])).unwrap();

        assert!(r.resolve_send(out.id, Ok(())).unwrap().is_none());
        assert!(r.transcript().is_empty());
    }

    #[test]
    fn redelivered_event_with_same_id_is_dropped() {
        let mut r = opened("p1", vec![]);
        let event = InboundMessage::new("p1", "hey").with_id("d-1");

        assert!(matches!(r.on_remote_arrival(event.clone()), Arrival::Appended(_)));
        assert_eq!(r.on_remote_arrival(event), Arrival::Duplicate);
        assert_eq!(r.transcript().len(), 1);
    }

    #[test]
    fn remembered_delivery_ids_are_bounded() {
        let mut r = opened("p1", vec![]);
        for n in 0..=SEEN_DELIVERY_LIMIT {
            let event = InboundMessage::new("p1", "m").with_id(format!("d-{n}"));
            assert!(matches!(r.on_remote_arrival(event), Arrival::Appended(_)));
        }
        assert_eq!(r.seen_deliveries.len(), SEEN_DELIVERY_LIMIT);

        // the newest ids are still recognised, the oldest has been evicted
        let newest = InboundMessage::new("p1", "m").with_id(format!("d-{SEEN_DELIVERY_LIMIT}"));
        assert_eq!(r.on_remote_arrival(newest), Arrival::Duplicate);
        let oldest = InboundMessage::new("p1", "m").with_id("d-0");
        assert!(matches!(r.on_remote_arrival(oldest), Arrival::Appended(_)));
    }

    #[test]
    fn events_without_id_are_never_deduped() {
        let mut r = opened("p1", vec![]);
        r.on_remote_arrival(InboundMessage::new("p1", "ok"));
        r.on_remote_arrival(InboundMessage::new("p1", "ok"));
        assert_eq!(r.transcript().len(), 2);
    }

    #[test]
    fn ids_are_stable_across_snapshots() {
        let live = RecordingLive::default();
        let mut r = opened("p1", vec![entry(true, "hi")]);
        let before: Vec<_> = r.snapshot().iter().map(|m| m.id).collect();

        r.send_message(&"p1".into(), "yo", &live).unwrap();
        let after: Vec<_> = r.snapshot().iter().map(|m| m.id).collect();

        assert_eq!(&after[..1], &before[..]);
        assert_ne!(after[0], after[1]);
    }

    #[test]
    fn clear_forgets_conversation_and_pending_fetch() {
        let mut r = Reconciler::new("u1".into());
        let ticket = r.begin_selection("p1".into()).unwrap();
        r.clear();

        assert!(r.complete_selection(ticket, Ok(vec![entry(true, "x")])).is_err());
        assert!(r.active_peer().is_none());
        assert_eq!(
            r.on_remote_arrival(InboundMessage::new("p1", "late")),
            Arrival::Ignored
        );
    }
}
