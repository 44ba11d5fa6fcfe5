//! Push channel error types.

use thiserror::Error;

/// Result type for push channel operations.
pub type Result<T> = std::result::Result<T, PushError>;

/// Errors produced while establishing or running the push channel.
///
/// All of these are recoverable from the channel's point of view: they feed
/// the reconnection policy rather than propagating to callers, except on
/// the very first connection attempt.
#[derive(Debug, Error)]
pub enum PushError {
    /// WebSocket transport failed to establish or broke mid-session.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// A bounded wait (connect or auth handshake) elapsed.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Could not obtain a login token for the handshake.
    #[error("token unavailable: {0}")]
    Token(#[from] crate::backend::ClientError),

    /// The backend rejected the auth handshake.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The server closed the connection before the handshake completed.
    #[error("connection closed: {0}")]
    Closed(String),

    /// A frame could not be serialized or parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}
