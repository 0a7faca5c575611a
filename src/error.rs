//! Error types for socketio-channel.

use thiserror::Error;

/// Main error type for all channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (handshake and arguments).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Web socket protocol or connection error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame could not be decoded.
    #[error("Wrong packet")]
    WrongPacket,

    /// Open frame payload is not a valid handshake header.
    #[error("Wrong header")]
    WrongHeader,

    /// Outbound queue saturated.
    #[error("Socket overflood")]
    Overflow,

    /// No reply arrived for an acknowledgment request in time.
    #[error("Timeout")]
    Timeout,

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Room operation on a channel that was not accepted by a server.
    #[error("Server not set")]
    ServerNotSet,

    /// Any other protocol violation.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using ChannelError.
pub type Result<T> = std::result::Result<T, ChannelError>;
