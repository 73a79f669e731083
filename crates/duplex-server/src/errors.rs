//! Error types for connections and transports.

use duplex_core::CodecError;
use duplex_router::RouterError;

/// Failures reported by a [`crate::transport`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer or the local side already closed the transport.
    #[error("transport closed")]
    Closed,

    /// A write did not complete within the write timeout.
    #[error("write timed out")]
    Timeout,

    /// Underlying WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Errors surfaced by [`crate::connection::Connection`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection is closed or its outbound queue rejected the payload.
    #[error("connection closed")]
    Closed,

    /// Payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A correlated request failed.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Dialing the remote endpoint failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The pumps were already started for this connection.
    #[error("connection already started")]
    AlreadyStarted,
}

impl From<serde_json::Error> for ConnectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(CodecError::from(err))
    }
}
