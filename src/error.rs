//! Error types for the relay
//!
//! One enum per failure domain. Uses thiserror for ergonomic error definitions.
//! None of these cascade: each is terminal only at the scope that detects it.

use thiserror::Error;

use crate::types::ClientId;

/// Envelope encode/decode errors
///
/// Decode errors are recovered locally by the read loop: the frame is
/// dropped and the connection keeps going.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Invalid JSON in the envelope shell or in its `data` payload
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// The envelope `type` is not one the relay knows
    #[error("unknown message kind: {0}")]
    UnknownMessageKind(String),

    /// Serialization failed
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Transport errors (fatal to the owning connection)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection closed normally")]
    ClosedNormally,

    #[error("connection closed abnormally")]
    ClosedAbnormally,

    #[error("message exceeds size limit")]
    MessageTooLarge,

    #[error("network failure")]
    Network,

    #[error("read timeout")]
    ReadTimeout,

    #[error("write after close")]
    WriteAfterClose,

    #[error("write timeout")]
    WriteTimeout,

    #[error("write unexpectedly failed")]
    WriteFailed,
}

/// Client registry conflicts
///
/// Logged by the registry worker; the conflicting operation is rejected
/// and the registry stays consistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// First registration wins
    #[error("client {0} is already registered")]
    AlreadyRegistered(ClientId),

    #[error("client {0} is not registered")]
    NotRegistered(ClientId),

    /// The registry worker has stopped
    #[error("client registry is closed")]
    Closed,
}

/// Room membership errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// Tried to let out a client that never entered (or already left)
    #[error("client {0} is not a member of the room")]
    NotAMember(ClientId),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Application-level errors
///
/// Returned by the connection handler and the binary.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The upgrade request carried no display name
    #[error("client name not provided")]
    MissingName,
}
