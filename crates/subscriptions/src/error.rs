use crate::types::FieldPath;

/// Errors surfaced by the subscription subsystem.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "The event name `{event_name}` is declared by both `{first}` and `{second}` \
         in schema `{schema}`"
    )]
    DuplicateEventName {
        schema: &'static str,
        event_name: String,
        first: FieldPath,
        second: FieldPath,
    },
    #[error("No schema named `{0}` is registered")]
    UnknownSchema(String),
    #[error("The client connection is closed")]
    ConnectionClosed,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Failed to serialize the event payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures reported by a [`ClientConnection`](crate::ports::ClientConnection).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("The connection is not open")]
    NotOpen,
    #[error("The connection was closed by the peer: {0}")]
    Closed(String),
    #[error("The transport failed: {0}")]
    Io(String),
}

/// Failures while decoding or encoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error("Failed to encode message: {0}")]
    Encoding(#[source] serde_json::Error),
}
