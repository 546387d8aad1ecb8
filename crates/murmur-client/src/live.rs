//! WebSocket connection to the live gateway.
//!
//! A connection is split into a writer task (commands out, heartbeat pings)
//! and a reader task (events in). They are wired to the rest of the client
//! through unbounded channels: [`LiveSender`] feeds the writer, [`LiveFeed`]
//! drains the reader. When either side of the socket goes away both tasks
//! stop, the feed yields `None` and further emits fail.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use murmur_types::UserId;
use murmur_types::events::{InboundMessage, LiveCommand, LiveEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::backend::LiveChannel;
use crate::error::CollaboratorError;

/// Client-side ping interval; keeps idle connections from being reaped by
/// proxies.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Sending half of a live connection.
#[derive(Clone)]
pub struct LiveSender {
    tx: mpsc::UnboundedSender<LiveCommand>,
}

impl LiveSender {
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl LiveChannel for LiveSender {
    fn emit(&self, command: LiveCommand) -> Result<(), CollaboratorError> {
        self.tx.send(command).map_err(|_| CollaboratorError::Closed)
    }
}

/// Inbound message events of a live connection.
pub struct LiveFeed {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl LiveFeed {
    pub fn new(rx: mpsc::UnboundedReceiver<InboundMessage>) -> Self {
        Self { rx }
    }

    /// Next inbound message, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }
}

/// Derive the gateway endpoint from the http(s) API base URL: same host and
/// path prefix, ws(s) scheme, `/gateway` appended. Query and fragment of the
/// API URL are not carried over.
pub fn gateway_url_from_api(api_url: &str) -> Result<String, CollaboratorError> {
    let mut url = Url::parse(api_url)?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(CollaboratorError::Transport(format!(
                "no gateway for a {other}:// api url"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| CollaboratorError::Transport(format!("cannot switch {api_url} to {scheme}")))?;
    url.set_query(None);
    url.set_fragment(None);
    let path = format!("{}/gateway", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url.to_string())
}

/// Connect to the gateway at `url` and register as `user`.
pub async fn connect(url: &str, user: &UserId) -> Result<(LiveSender, LiveFeed), CollaboratorError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| CollaboratorError::Transport(format!("connect to {url} failed: {e}")))?;
    info!(%url, %user, "connected to live gateway");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<LiveCommand>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<InboundMessage>();

    // Registration goes out before anything the caller emits.
    cmd_tx
        .send(LiveCommand::AddUser {
            user_id: user.clone(),
        })
        .map_err(|_| CollaboratorError::Closed)?;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                command = cmd_rx.recv() => {
                    let Some(command) = command else { break };
                    let text = match serde_json::to_string(&command) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("dropping unserializable command: {}", e);
                            continue;
                        }
                    };
                    if ws_tx.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if ws_tx.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("live gateway read failed: {}", e);
                    break;
                }
            };

            match serde_json::from_str::<LiveEvent>(text.as_str()) {
                Ok(LiveEvent::MessageReceive(message)) => {
                    trace!(from = %message.from, "live message");
                    if event_tx.send(message).is_err() {
                        break;
                    }
                }
                Ok(LiveEvent::Unknown) => {
                    debug!("skipping unhandled live event");
                }
                Err(e) => {
                    let raw = text.as_str();
                    warn!(
                        "bad live event: {} -- raw: {}",
                        e,
                        raw.chars().take(200).collect::<String>()
                    );
                }
            }
        }
    });

    tokio::spawn(async move {
        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }
        info!("disconnected from live gateway");
    });

    Ok((LiveSender { tx: cmd_tx }, LiveFeed::new(event_rx)))
}
