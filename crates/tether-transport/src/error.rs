/// Errors that can occur in the transport layer.
///
/// Every variant ends a connection attempt or an open connection. The
/// engine reports them through its disconnect callback and leaves retries
/// to the reconnect supervisor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server address could not be turned into a `ws://` or `wss://` URL.
    #[error("invalid server address {address:?}: {reason}")]
    InvalidAddress {
        /// The address as the caller supplied it.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The WebSocket handshake did not finish within the connect timeout.
    #[error("handshake timed out after {0} ms")]
    HandshakeTimeout(u64),

    /// The TCP connect or WebSocket upgrade failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The remote side closed the connection.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The connection was closed from this side.
    #[error("closed locally")]
    ClosedLocally,

    /// The transport could not start a runtime for its I/O task.
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),
}
