// ABOUTME: Relay messages exchanged over the WebSocket, tagged by `type`.
// ABOUTME: One JSON object per text frame; decode never panics on bad input.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::payload::Payload;

/// How a response came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The completion predicate fired and `text` is the extracted result.
    #[default]
    Completed,
    /// No completion signal arrived before the deadline.
    TimedOut,
    /// The surface never accepted the prompt, or went away mid-task.
    Failed,
}

impl ResponseStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, ResponseStatus::Completed)
    }
}

/// A frame on the relay connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Dispatcher -> agent: enqueue this payload.
    Prompt { payload: Payload },
    /// Agent -> dispatcher: result for the oldest outstanding prompt.
    Response {
        payload: Payload,
        #[serde(default, skip_serializing_if = "ResponseStatus::is_completed")]
        status: ResponseStatus,
    },
    /// Agent -> dispatcher: the automation session has ended.
    SessionExpired,
}

impl RelayMessage {
    pub fn prompt(payload: Payload) -> Self {
        RelayMessage::Prompt { payload }
    }

    pub fn response(payload: Payload) -> Self {
        RelayMessage::Response {
            payload,
            status: ResponseStatus::Completed,
        }
    }

    pub fn failed_response(payload: Payload, status: ResponseStatus) -> Self {
        RelayMessage::Response { payload, status }
    }

    /// Wire name of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayMessage::Prompt { .. } => "prompt",
            RelayMessage::Response { .. } => "response",
            RelayMessage::SessionExpired => "session_expired",
        }
    }
}

/// Serialize a message into the text of one frame.
pub fn encode(msg: &RelayMessage) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Parse the text of one frame.
pub fn decode(text: &str) -> Result<RelayMessage> {
    Ok(serde_json::from_str(text)?)
}
