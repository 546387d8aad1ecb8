mod config;
mod terminal;

use std::sync::Arc;

use murmur_client::{ChatSession, Error, HttpApi, live};
use murmur_types::{MessageId, PeerId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::Config;
use crate::terminal::{Input, TerminalNotifier, delivery_notice, render};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the transcript
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=info,murmur_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;

    let api = Arc::new(HttpApi::new(
        &config.api_url,
        config.token.clone(),
        config.http_timeout,
    )?);
    let (sender, feed) = live::connect(&config.gateway_url, &config.user_id).await?;

    let session = Arc::new(ChatSession::new(
        config.user_id.clone(),
        api.clone(),
        api,
        Arc::new(sender),
        Arc::new(TerminalNotifier),
    ));
    info!(user = %config.user_id, api = %config.api_url, "murmur ready");

    let feed_session = session.clone();
    let mut feed_task = tokio::spawn(async move { feed_session.run_live_feed(feed).await });

    if let Some(peer) = config.peer_id.clone() {
        open(&session, peer).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut feed_task => {
                warn!("live connection lost, exiting");
                break;
            }
        };
        let Some(line) = line else { break };

        match Input::parse(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Invalid(reason) => println!("{reason}"),
            Input::Open(peer) => open(&session, peer).await,
            Input::History => print_transcript(&session),
            Input::Retry(id) => {
                let session = session.clone();
                tokio::spawn(async move {
                    let outcome = session.retry(id).await;
                    report(&session, &outcome);
                });
            }
            Input::Send(text) => {
                let Some(peer) = session.active_peer() else {
                    println!("open a conversation first: /open <peer-id>");
                    continue;
                };
                let outgoing = match session.start_send(&peer, &text) {
                    Ok(outgoing) => outgoing,
                    Err(e) => {
                        println!("! {e}");
                        continue;
                    }
                };
                if let Some(message) = session.message(outgoing.id) {
                    println!("{}", render(&message));
                }

                // The durable write must not hold up the prompt.
                let session = session.clone();
                tokio::spawn(async move {
                    let outcome = session.finish_send(outgoing).await;
                    if outcome.is_err() {
                        report(&session, &outcome);
                    }
                });
            }
        }
    }

    session.close();
    feed_task.abort();
    Ok(())
}

async fn open(session: &ChatSession, peer: PeerId) {
    match session.select_conversation(peer.clone()).await {
        Ok(_) => {
            println!("-- conversation with {peer} --");
            print_transcript(session);
        }
        Err(Error::Superseded { .. }) => {}
        Err(e) => println!("! {e}"),
    }
}

fn report(session: &ChatSession, outcome: &murmur_client::Result<MessageId>) {
    let still_shown = match outcome {
        Err(Error::SendFailed { id, .. }) => session.message(*id).is_some(),
        _ => false,
    };
    println!("{}", delivery_notice(outcome, still_shown));
}

fn print_transcript(session: &ChatSession) {
    for message in session.snapshot() {
        println!("{}", render(&message));
    }
}
