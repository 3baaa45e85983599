//! Error types for the real-time channel.

use thiserror::Error;

use crate::session::ConnectionId;

/// Errors that can occur on a channel connection.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Encryption was requested before key exchange finished.
    #[error("secure channel not established")]
    SecureChannelNotEstablished,

    /// The peer sent its public key without a pending key exchange.
    #[error("session not initialized")]
    SessionNotInitialized,

    /// An application event arrived before authentication.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The credential was rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Malformed event or payload.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("crypto error: {0}")]
    Crypto(#[from] berryvault_core::CoreError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),
}

impl ChannelError {
    /// Whether the connection should be dropped after this error.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ChannelError::SecureChannelNotEstablished
                | ChannelError::SessionNotInitialized
                | ChannelError::AuthenticationRequired
        )
    }
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
