// ABOUTME: Error types for coven-relay-agent.
// ABOUTME: AgentError for config and transport failures, SurfaceError for UI automation failures.

use thiserror::Error;

/// Failures reported by an automation surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("Element not found: {0}")]
    ElementMissing(String),

    #[error("Surface detached")]
    Detached,

    #[error("Surface driver error: {0}")]
    Driver(String),
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] coven_relay_proto::ProtoError),

    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
