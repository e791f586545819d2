//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding control frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame is not a valid `{type, data}` envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// Message type is not an exit-node command
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Command payload does not match the expected shape
    #[error("Invalid payload for {message_type}: {source}")]
    InvalidPayload {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
