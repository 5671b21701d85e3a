// ABOUTME: The unit of work carried across the relay in both directions.
// ABOUTME: Only `text` changes between prompt and response; everything else round-trips.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A request on the way to the agent, or its result on the way back.
///
/// There is no correlation id. A response is matched to its prompt purely by
/// order, so the identity fields (`ts`, `thread_ts`, `channel`, `pending_ts`)
/// and any fields this crate does not know about must come back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Prompt text outbound, result text inbound.
    pub text: String,
    /// Originating message id in the chat platform.
    pub ts: String,
    /// Parent thread, when the originating message was itself in a thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    /// Channel the result is posted to.
    pub channel: String,
    /// Placeholder ("working on it") message to remove once the result is posted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_ts: Option<String>,
    /// Fields added by other producers, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Payload {
    /// Create a payload for a top-level message.
    pub fn new(text: impl Into<String>, ts: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ts: ts.into(),
            thread_ts: None,
            channel: channel.into(),
            pending_ts: None,
            extra: Map::new(),
        }
    }

    /// Set the parent thread.
    pub fn with_thread_ts(mut self, thread_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }

    /// Set the placeholder message id.
    pub fn with_pending_ts(mut self, pending_ts: impl Into<String>) -> Self {
        self.pending_ts = Some(pending_ts.into());
        self
    }

    /// Build the response for this payload: same identity, new text.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self.clone()
        }
    }

    /// Thread the result belongs in: the parent thread if there is one,
    /// otherwise a thread rooted at the originating message.
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    /// True when `other` carries the same identity fields as `self`.
    pub fn same_origin(&self, other: &Payload) -> bool {
        self.ts == other.ts
            && self.thread_ts == other.thread_ts
            && self.channel == other.channel
            && self.pending_ts == other.pending_ts
            && self.extra == other.extra
    }
}
