//! In-memory transport for tests and offline hosts.
//!
//! [`MemoryTransport::pair`] returns the transport together with a
//! [`MemoryPeer`] that plays the server: it injects inbound frames, drops
//! the connection, makes the next `open()` fail and records every frame
//! the client sent. Both halves share one locked state, so a test can hold
//! the peer while the engine owns the transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    normalize_address, ConnectionId, Transport, TransportError, TransportEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Idle,
    Connecting,
    Open,
}

#[derive(Debug)]
struct Shared {
    state: LinkState,
    next_id: u64,
    events: VecDeque<TransportEvent>,
    sent: Vec<Vec<u8>>,
    opened_urls: Vec<String>,
    fail_next_open: Option<TransportError>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            state: LinkState::Idle,
            next_id: 1,
            events: VecDeque::new(),
            sent: Vec::new(),
            opened_urls: Vec::new(),
            fail_next_open: None,
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
}

/// Server half of an in-memory connection.
///
/// Cheap to clone; every clone drives the same transport.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryTransport {
    /// Creates a transport and the peer that controls it.
    ///
    /// ```rust
    /// use tether_transport::{MemoryTransport, Transport, TransportEvent};
    ///
    /// let (mut transport, peer) = MemoryTransport::pair();
    /// transport.open("localhost:38281").unwrap();
    /// assert_eq!(transport.poll_event(), Some(TransportEvent::Opened));
    ///
    /// peer.push_text(r#"[{"cmd":"RoomInfo"}]"#);
    /// assert!(matches!(transport.poll_event(), Some(TransportEvent::Message(_))));
    /// ```
    pub fn pair() -> (Self, MemoryPeer) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MemoryPeer { shared },
        )
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, address: &str) -> Result<ConnectionId, TransportError> {
        let url = normalize_address(address)?;
        let mut shared = lock(&self.shared);

        if let Some(err) = shared.fail_next_open.take() {
            tracing::debug!(%url, error = %err, "memory open failed");
            return Err(err);
        }

        let id = ConnectionId::new(shared.next_id);
        shared.next_id += 1;
        shared
            .events
            .retain(|event| matches!(event, TransportEvent::Closed(_)));
        if shared.state != LinkState::Idle {
            shared
                .events
                .push_back(TransportEvent::Closed(TransportError::ClosedLocally));
        }
        shared.events.push_back(TransportEvent::Opened);
        shared.state = LinkState::Connecting;
        shared.opened_urls.push(url);
        Ok(id)
    }

    fn send(&mut self, frame: Vec<u8>) {
        let mut shared = lock(&self.shared);
        if shared.state != LinkState::Open {
            tracing::debug!(bytes = frame.len(), "send on closed transport ignored");
            return;
        }
        shared.sent.push(frame);
    }

    fn is_open(&self) -> bool {
        lock(&self.shared).state == LinkState::Open
    }

    fn close(&mut self) {
        let mut shared = lock(&self.shared);
        if shared.state != LinkState::Idle {
            shared.state = LinkState::Idle;
            shared
                .events
                .push_back(TransportEvent::Closed(TransportError::ClosedLocally));
        }
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        let mut shared = lock(&self.shared);
        let event = shared.events.pop_front()?;
        match &event {
            TransportEvent::Opened if shared.state == LinkState::Connecting => {
                shared.state = LinkState::Open;
            }
            TransportEvent::Closed(_) => shared.state = LinkState::Idle,
            _ => {}
        }
        Some(event)
    }
}

impl MemoryPeer {
    /// Queues one inbound frame.
    pub fn push_frame(&self, frame: Vec<u8>) {
        lock(&self.shared)
            .events
            .push_back(TransportEvent::Message(frame));
    }

    /// Queues one inbound text frame.
    pub fn push_text(&self, text: &str) {
        self.push_frame(text.as_bytes().to_vec());
    }

    /// Simulates the server or network dropping the connection.
    ///
    /// Does nothing when no connection is up, so a `Closed` is never
    /// queued twice for one `open()`.
    pub fn drop_connection(&self, reason: &str) {
        let mut shared = lock(&self.shared);
        if shared.state == LinkState::Idle {
            return;
        }
        shared.state = LinkState::Idle;
        shared.events.push_back(TransportEvent::Closed(
            TransportError::ConnectionClosed(reason.to_string()),
        ));
    }

    /// Makes the next `open()` fail with `err`.
    pub fn fail_next_open(&self, err: TransportError) {
        lock(&self.shared).fail_next_open = Some(err);
    }

    /// Every frame the client sent, oldest first.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.shared).sent.clone()
    }

    /// Removes and returns the frames sent so far.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut lock(&self.shared).sent)
    }

    /// How many times `open()` succeeded.
    pub fn open_count(&self) -> usize {
        lock(&self.shared).opened_urls.len()
    }

    /// The normalized URL of the most recent successful `open()`.
    pub fn last_url(&self) -> Option<String> {
        lock(&self.shared).opened_urls.last().cloned()
    }

    /// Whether the client side currently considers the link open.
    pub fn is_open(&self) -> bool {
        lock(&self.shared).state == LinkState::Open
    }
}
