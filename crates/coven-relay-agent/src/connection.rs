// ABOUTME: WebSocket client side of the relay: connect, reconnect with backoff, shuttle frames.
// ABOUTME: Prompts go into the agent loop; responses come out of it through a channel that outlives connections.

use crate::agent::AgentInput;
use crate::config::ReconnectPolicy;
use crate::error::Result;

use coven_relay_proto::{decode, encode, RelayMessage};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Asks the connection task to drop the current session and dial again.
///
/// The dispatcher treats a fresh connection as a fresh agent session, so this
/// is how a surface reload becomes visible on the other side.
#[derive(Debug, Clone)]
pub struct ReconnectHandle {
    tx: mpsc::Sender<()>,
}

impl ReconnectHandle {
    /// Requests coalesce: several before the next connect cause one reconnect.
    pub fn request(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Create a reconnect handle and the receiver `run_connection` listens on.
pub fn reconnect_channel() -> (ReconnectHandle, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel(1);
    (ReconnectHandle { tx }, rx)
}

/// How one connection ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The dispatcher closed the connection; reconnect.
    Closed,
    /// The agent asked for a new connection; reconnect without backoff.
    Restart,
    /// Cancelled, or the agent loop is gone; stop for good.
    Shutdown,
}

/// Keep a connection to the dispatcher until cancelled.
///
/// A frame that failed to go out is kept and sent first on the next
/// connection, so a response produced during an outage is not lost.
pub async fn run_connection(
    url: String,
    policy: ReconnectPolicy,
    inbound: mpsc::Sender<AgentInput>,
    mut outbound: mpsc::Receiver<RelayMessage>,
    mut reconnect: mpsc::Receiver<()>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut delay = policy.initial;
    let mut unsent: Option<String> = None;

    loop {
        // Whatever was asked for before this dial is satisfied by it.
        while reconnect.try_recv().is_ok() {}

        let connected = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((stream, _response)) => {
                info!(url = %url, "Connected to relay");
                delay = policy.initial;
                if inbound.send(AgentInput::Connected).await.is_err() {
                    return Ok(());
                }
                let ended = session(
                    stream,
                    &inbound,
                    &mut outbound,
                    &mut reconnect,
                    &mut unsent,
                    &cancel,
                )
                .await;
                match ended {
                    Ok(SessionEnd::Shutdown) => return Ok(()),
                    Ok(SessionEnd::Restart) => {
                        info!("Reconnecting to relay for a fresh session");
                        continue;
                    }
                    Ok(SessionEnd::Closed) => info!("Relay closed the connection"),
                    Err(e) => warn!(error = %e, "Relay connection lost"),
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, retry_in = ?delay, "Failed to connect to relay");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
        delay = policy.next_delay(delay);
    }
}

async fn session(
    stream: RelayStream,
    inbound: &mpsc::Sender<AgentInput>,
    outbound: &mut mpsc::Receiver<RelayMessage>,
    reconnect: &mut mpsc::Receiver<()>,
    unsent: &mut Option<String>,
    cancel: &CancellationToken,
) -> Result<SessionEnd> {
    let (mut write, mut read) = stream.split();

    if let Some(text) = unsent.clone() {
        debug!("Sending frame held over from the previous connection");
        write.send(Message::Text(text.into())).await?;
        *unsent = None;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(SessionEnd::Shutdown);
            }
            request = reconnect.recv() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(match request {
                    Some(()) => SessionEnd::Restart,
                    None => SessionEnd::Shutdown,
                });
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode(text.as_str()) {
                    Ok(RelayMessage::Prompt { payload }) => {
                        if inbound.send(AgentInput::Prompt(payload)).await.is_err() {
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                    Ok(other) => {
                        debug!(kind = other.kind(), "Ignoring message not meant for the agent");
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed frame"),
                },
                Some(Ok(Message::Binary(_))) => warn!("Ignoring binary frame"),
                Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    return Ok(SessionEnd::Shutdown);
                };
                let text = match encode(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(kind = msg.kind(), error = %e, "Failed to encode message");
                        continue;
                    }
                };
                *unsent = Some(text.clone());
                write.send(Message::Text(text.into())).await?;
                *unsent = None;
                debug!(kind = msg.kind(), "Sent to relay");
            }
        }
    }
}
