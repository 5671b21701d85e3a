// ABOUTME: Error types for the relay wire protocol.
// ABOUTME: Separates unparseable frames from frames with an unexpected shape.

use thiserror::Error;

/// Errors produced while encoding or decoding relay frames.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// Frame is not valid JSON or does not match any known message.
    #[error("malformed relay message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame was binary or otherwise not a text frame.
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(String),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
