//! Router error types.

use std::fmt;

/// Why a router was shut down.
///
/// Latched once; every blocked and every later call reports the same reason.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ShutdownReason {
    /// No specific reason was given.
    #[default]
    Generic,
    /// The owning connection was closed explicitly.
    ManualClose,
    /// The owning connection lost its peer.
    Disconnected,
    /// Caller-supplied reason.
    Custom(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => f.write_str("router shut down"),
            Self::ManualClose => f.write_str("connection closed manually"),
            Self::Disconnected => f.write_str("connection disconnected"),
            Self::Custom(reason) => f.write_str(reason),
        }
    }
}

/// Errors returned by [`crate::Router::send_message`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// No reply arrived within the per-call timeout.
    #[error("request timed out")]
    Timeout,

    /// The router was shut down before a reply arrived.
    #[error("shutdown: {0}")]
    Shutdown(ShutdownReason),

    /// The send function rejected the request.
    #[error("send failed: {0}")]
    Send(String),
}
