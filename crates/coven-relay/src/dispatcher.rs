// ABOUTME: Server-side half of the relay: agent registry, prompt broadcast and liveness tracking.
// ABOUTME: Forwards responses to the output sink and reports session expiry once per outage.

use crate::error::{RelayError, Result};
use crate::sink::{OutputSink, StatusNotice};

use coven_relay_proto::{decode, Payload, RelayMessage, ResponseStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Buffer size for each agent's outbound message channel.
pub const AGENT_CHANNEL_BUFFER: usize = 100;

/// Identifies one agent connection for the lifetime of that connection.
pub type AgentId = Uuid;

/// Snapshot of dispatcher state for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStatus {
    pub connected_agents: usize,
    pub session_expired: bool,
}

/// Tracks connected agents and relays between callers, agents and the sink.
///
/// Prompts are broadcast to every connected agent. That is only correct while
/// a single agent is connected: responses carry no request id and are
/// correlated purely by order.
pub struct Dispatcher {
    sink: Arc<dyn OutputSink>,
    agents: RwLock<HashMap<AgentId, mpsc::Sender<RelayMessage>>>,
    /// Set when a session expiry has been reported; cleared by a new connection.
    session_expired: AtomicBool,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            sink,
            agents: RwLock::new(HashMap::new()),
            session_expired: AtomicBool::new(false),
        }
    }

    /// Register a freshly accepted agent connection.
    ///
    /// Clears the liveness flag and tells the sink an agent is live. The
    /// returned receiver yields the messages to write to this connection.
    pub async fn on_connect(&self) -> (AgentId, mpsc::Receiver<RelayMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(AGENT_CHANNEL_BUFFER);
        let total = {
            let mut agents = self.agents.write().await;
            agents.insert(id, tx);
            agents.len()
        };
        self.session_expired.store(false, Ordering::SeqCst);

        info!(agent_id = %id, connected_agents = total, "Agent connected");
        if total > 1 {
            warn!(
                connected_agents = total,
                "More than one agent connected; prompts are broadcast and responses may interleave"
            );
        }
        self.post_status(StatusNotice::AgentConnected).await;
        (id, rx)
    }

    /// Forget an agent connection and tell the sink.
    ///
    /// The liveness flag is left alone: a transport drop is not a session expiry.
    pub async fn on_disconnect(&self, id: AgentId) {
        let removed = self.agents.write().await.remove(&id).is_some();
        if !removed {
            debug!(agent_id = %id, "Disconnect for unknown agent");
            return;
        }
        info!(agent_id = %id, "Agent disconnected");
        self.post_status(StatusNotice::AgentDisconnected).await;
    }

    /// Broadcast a prompt to the connected agents.
    ///
    /// Prompts are not buffered. With no agent connected the prompt is dropped
    /// and `NoAgentConnected` is returned so the caller can tell its user to
    /// resend. Returns the number of connections the prompt reached.
    pub async fn send_prompt(&self, payload: Payload) -> Result<usize> {
        let senders: Vec<(AgentId, mpsc::Sender<RelayMessage>)> = self
            .agents
            .read()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in senders {
            match tx.send(RelayMessage::prompt(payload.clone())).await {
                Ok(()) => delivered += 1,
                Err(_) => debug!(agent_id = %id, "Agent channel closed, skipping"),
            }
        }

        if delivered == 0 {
            warn!(ts = %payload.ts, channel = %payload.channel, "No agent connected, prompt dropped");
            return Err(RelayError::NoAgentConnected);
        }

        debug!(
            ts = %payload.ts,
            channel = %payload.channel,
            delivered,
            "Prompt sent to agent"
        );
        Ok(delivered)
    }

    /// Handle one text frame from an agent.
    ///
    /// Malformed frames are logged and dropped; the connection stays usable.
    pub async fn handle_frame(&self, id: AgentId, text: &str) {
        match decode(text) {
            Ok(RelayMessage::Response { payload, status }) => {
                self.on_response(payload, status).await
            }
            Ok(RelayMessage::SessionExpired) => self.on_session_expired().await,
            Ok(RelayMessage::Prompt { .. }) => {
                warn!(agent_id = %id, "Agent sent a prompt; ignoring")
            }
            Err(e) => {
                warn!(agent_id = %id, error = %e, frame_len = text.len(), "Dropping malformed frame")
            }
        }
    }

    /// Post a completed (or failed) result back into its originating thread.
    pub async fn on_response(&self, payload: Payload, status: ResponseStatus) {
        let text = match status {
            ResponseStatus::Completed => payload.text.clone(),
            ResponseStatus::TimedOut => format!(":hourglass: {}", payload.text),
            ResponseStatus::Failed => format!(":x: {}", payload.text),
        };

        info!(
            ts = %payload.ts,
            channel = %payload.channel,
            status = ?status,
            text_len = payload.text.len(),
            "Response received"
        );

        if let Err(e) = self
            .sink
            .post_result(&payload.channel, Some(payload.reply_thread_ts()), &text)
            .await
        {
            error!(error = %e, ts = %payload.ts, "Failed to post result");
        }

        if let Some(pending_ts) = payload.pending_ts.as_deref() {
            if let Err(e) = self.sink.delete_message(&payload.channel, pending_ts).await {
                warn!(error = %e, pending_ts = %pending_ts, "Failed to remove placeholder");
            }
        }
    }

    /// Report a session expiry, once per outage.
    pub async fn on_session_expired(&self) {
        if self.session_expired.swap(true, Ordering::SeqCst) {
            debug!("Session expiry already reported");
            return;
        }
        warn!("Agent session expired");
        self.post_status(StatusNotice::SessionExpired).await;
    }

    /// True once an expiry was reported and no agent has connected since.
    pub fn is_session_expired(&self) -> bool {
        self.session_expired.load(Ordering::SeqCst)
    }

    pub async fn connected_agents(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn status(&self) -> DispatcherStatus {
        DispatcherStatus {
            connected_agents: self.connected_agents().await,
            session_expired: self.is_session_expired(),
        }
    }

    async fn post_status(&self, notice: StatusNotice) {
        if let Err(e) = self.sink.post_status(notice).await {
            error!(error = %e, notice = ?notice, "Failed to post status");
        }
    }
}
