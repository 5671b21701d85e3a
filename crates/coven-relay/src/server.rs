// ABOUTME: WebSocket listener that agents connect to.
// ABOUTME: One task per connection: a writer draining the dispatcher channel and a reader loop.

use crate::dispatcher::{AgentId, Dispatcher};
use crate::error::Result;

use coven_relay_proto::{encode, RelayMessage};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Accepts agent connections and hands their frames to the dispatcher.
pub struct RelayServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl RelayServer {
    /// Bind the listener. Use port 0 to pick a free port.
    pub async fn bind(addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Relay listener bound");
        Ok(Self {
            listener,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Relay listener stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, dispatcher, cancel).await {
                            warn!(peer = %peer, error = %e, "Agent connection ended with error");
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    debug!(peer = %peer, "WebSocket handshake complete");

    let (ws_sink, mut ws_stream) = ws.split();
    let (agent_id, outbound) = dispatcher.on_connect().await;
    info!(peer = %peer, agent_id = %agent_id, "Agent session started");

    let writer = tokio::spawn(write_outbound(agent_id, outbound, ws_sink));

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatcher.handle_frame(agent_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        warn!(agent_id = %agent_id, len = bytes.len(), "Ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                }
            }
        }
    };

    writer.abort();
    dispatcher.on_disconnect(agent_id).await;
    outcome
}

/// Drain the dispatcher's channel for one agent into its socket.
async fn write_outbound(
    agent_id: AgentId,
    mut outbound: mpsc::Receiver<RelayMessage>,
    mut sink: WsSink,
) {
    while let Some(msg) = outbound.recv().await {
        let text = match encode(&msg) {
            Ok(text) => text,
            Err(e) => {
                error!(agent_id = %agent_id, error = %e, "Failed to encode message");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            warn!(agent_id = %agent_id, error = %e, kind = msg.kind(), "Failed to write to agent");
            break;
        }
        debug!(agent_id = %agent_id, kind = msg.kind(), "Message written to agent");
    }
    let _ = sink.close().await;
}
