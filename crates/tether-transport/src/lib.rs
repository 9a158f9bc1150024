//! Client transport layer for Tether.
//!
//! Provides the [`Transport`] trait: one duplex message-stream connection
//! to the coordination server, driven from the caller's thread.
//!
//! A transport never calls back into the caller. Everything the socket
//! produces (the connection opening, each inbound frame, the close) is
//! queued as a [`TransportEvent`] and handed out by
//! [`Transport::poll_event`] in arrival order. That queue is the only
//! path from the I/O side into the protocol engine.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`
//!
//! [`MemoryTransport`] is always available; tests and offline hosts use it
//! in place of a socket.

mod address;
mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use address::{normalize_address, DEFAULT_PORT};
pub use error::TransportError;
pub use memory::{MemoryPeer, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};

use std::fmt;

/// Identifies one `open()` of a transport.
///
/// Every successful [`Transport::open`] gets a fresh id, so events that
/// belong to an earlier connection can be told apart and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake finished; frames can now be sent.
    Opened,
    /// One inbound frame, exactly as received.
    Message(Vec<u8>),
    /// The connection ended. Yielded exactly once per `open()`.
    Closed(TransportError),
}

/// One duplex connection to the server.
///
/// ## Contract
///
/// - `open` validates the address and starts connecting. It does not wait
///   for the handshake; success or failure arrives later as
///   [`TransportEvent::Opened`] or [`TransportEvent::Closed`].
/// - Exactly one `Closed` event is produced per successful `open`.
///   Opening again closes the previous connection first: its `Closed`
///   stays queued ahead of the new connection's events, and its other
///   queued events are discarded.
/// - `send` is fire-and-forget. On a transport that is not open it logs
///   and drops the frame.
/// - `close` stops the connection immediately (`is_open` turns false) and
///   queues its `Closed` event before returning.
pub trait Transport: Send + 'static {
    /// Starts connecting to `address` (see [`normalize_address`]).
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidAddress`] for an address that can't
    /// be turned into a WebSocket URL. Implementations may also fail if
    /// they can't start their I/O.
    fn open(&mut self, address: &str) -> Result<ConnectionId, TransportError>;

    /// Queues one frame for sending.
    fn send(&mut self, frame: Vec<u8>);

    /// Returns `true` between `Opened` and the close of the connection.
    fn is_open(&self) -> bool;

    /// Closes the current connection, if any.
    fn close(&mut self);

    /// Takes the next queued event without blocking.
    fn poll_event(&mut self) -> Option<TransportEvent>;
}
