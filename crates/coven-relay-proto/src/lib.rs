// ABOUTME: Wire protocol for the relay between the dispatcher and the automation agent.
// ABOUTME: Defines Payload, RelayMessage and the JSON text-frame codec.

pub mod error;
pub mod message;
pub mod payload;

pub use error::{ProtoError, Result};
pub use message::{decode, encode, RelayMessage, ResponseStatus};
pub use payload::Payload;
