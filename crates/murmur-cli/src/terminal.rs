use std::io::Write;

use chrono::Local;
use murmur_client::{Error, Notifier};
use murmur_types::{DeliveryStatus, Message, MessageId, Origin, PeerId};

/// One line of user input.
#[derive(Debug, PartialEq)]
pub enum Input {
    Empty,
    Send(String),
    Open(PeerId),
    Retry(MessageId),
    History,
    Quit,
    Invalid(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };

        match (name, arg) {
            ("open", "") => Self::Invalid("usage: /open <peer-id>".into()),
            ("open", peer) => Self::Open(PeerId::new(peer)),
            ("retry", id) => match id.parse() {
                Ok(id) => Self::Retry(MessageId(id)),
                Err(_) => Self::Invalid("usage: /retry <message-id>".into()),
            },
            ("history", _) => Self::History,
            ("quit", _) | ("exit", _) => Self::Quit,
            _ => Self::Invalid(format!("unknown command /{name}")),
        }
    }
}

/// `[14:02] #3 you: yo (pending)`
pub fn render(message: &Message) -> String {
    let who = match message.origin {
        Origin::Local => "you",
        Origin::Peer => "them",
    };
    let status = match message.status {
        DeliveryStatus::Pending => " (pending)",
        DeliveryStatus::Confirmed => "",
        DeliveryStatus::Failed => " (failed, /retry to resend)",
    };
    format!(
        "[{}] #{} {}: {}{}",
        message.received_at.with_timezone(&Local).format("%H:%M"),
        message.id,
        who,
        message.text,
        status
    )
}

/// Outcome line for a durable write. A retry is only offered while the
/// failed message is still on screen.
pub fn delivery_notice(outcome: &murmur_client::Result<MessageId>, still_shown: bool) -> String {
    match outcome {
        Ok(id) => format!("#{id} delivered"),
        Err(Error::SendFailed { id, source }) if still_shown => {
            format!("! #{id} not delivered ({source}), /retry {id} to resend")
        }
        Err(Error::SendFailed { id, source }) => format!("! #{id} not delivered ({source})"),
        Err(e) => format!("! {e}"),
    }
}

/// Prints arrivals as they land and rings the terminal bell.
#[derive(Debug, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, message: &Message) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "\x07{}", render(message));
        let _ = out.flush();
    }
}
