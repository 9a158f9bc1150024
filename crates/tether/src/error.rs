//! Unified error type for the Tether client.

use tether_protocol::ProtocolError;
use tether_session::SessionError;
use tether_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each wrapped variant generates the `From`
/// impl, so `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection or handshake failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A record could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Session state could not be read as requested.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The server rejected the slot name, password or version.
    ///
    /// Never retried automatically: the caller has to fix the input and
    /// call `connect()` again.
    #[error("authentication refused: {}", .errors.join(", "))]
    AuthenticationRefused { errors: Vec<String> },

    /// The operation needs an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The client configuration is unusable.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
