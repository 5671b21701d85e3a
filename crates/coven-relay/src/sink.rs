// ABOUTME: Output sink abstraction the dispatcher posts results and status notices to.
// ABOUTME: StatusNotice covers agent connect, disconnect and session expiry.

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Liveness notices the dispatcher reports downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusNotice {
    /// An agent opened a relay connection.
    AgentConnected,
    /// An agent connection closed.
    AgentDisconnected,
    /// The agent reported that its automation session ended.
    SessionExpired,
}

impl fmt::Display for StatusNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusNotice::AgentConnected => write!(f, ":large_green_circle: Relay agent connected"),
            StatusNotice::AgentDisconnected => {
                write!(f, ":red_circle: Relay agent disconnected")
            }
            StatusNotice::SessionExpired => write!(
                f,
                ":warning: Relay agent session expired. Log in again, then reconnect the agent."
            ),
        }
    }
}

/// Where relayed results and status notices end up.
///
/// Failures are reported to the caller but the dispatcher only logs them:
/// a sink that cannot post must never stall the relay.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Post a result into `channel`, threaded under `thread_ts` when given.
    async fn post_result(&self, channel: &str, thread_ts: Option<&str>, text: &str)
        -> Result<()>;

    /// Post a liveness notice.
    async fn post_status(&self, notice: StatusNotice) -> Result<()>;

    /// Remove a previously posted message (the "working on it" placeholder).
    async fn delete_message(&self, _channel: &str, _ts: &str) -> Result<()> {
        Ok(())
    }
}
