// ABOUTME: Error types for coven-relay.
// ABOUTME: Defines RelayError covering config, Slack, agent delivery, WebSocket and IO failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Slack API error: {0}")]
    Slack(String),

    #[error("Slack client error: {0}")]
    SlackClient(#[from] slack_morphism::errors::SlackClientError),

    #[error("No agent connected; prompt dropped")]
    NoAgentConnected,

    #[error("Output sink error: {0}")]
    Sink(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] coven_relay_proto::ProtoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
