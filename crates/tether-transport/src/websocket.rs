//! WebSocket client transport using `tokio-tungstenite`.
//!
//! The socket lives in a Tokio task. The task pushes every event into one
//! unbounded channel; [`WebSocketTransport::poll_event`] drains that
//! channel from the caller's thread, so the engine sees frames in the
//! order the socket delivered them.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::{
    normalize_address, ConnectionId, Transport, TransportError, TransportEvent,
};

type EventSender = mpsc::UnboundedSender<(ConnectionId, TransportEvent)>;

/// Settings for [`WebSocketTransport`].
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// How long the TCP connect plus WebSocket upgrade may take before the
    /// attempt fails with [`TransportError::HandshakeTimeout`].
    ///
    /// Default: 10 seconds.
    pub connect_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Where the I/O task runs.
enum IoRuntime {
    /// A runtime created and owned by the transport.
    Owned(Runtime),
    /// A runtime owned by the host.
    Shared(Handle),
}

impl IoRuntime {
    fn handle(&self) -> &Handle {
        match self {
            Self::Owned(rt) => rt.handle(),
            Self::Shared(handle) => handle,
        }
    }
}

/// The connection currently owned by the transport.
struct ActiveConnection {
    id: ConnectionId,
    /// Dropping this sender tells the I/O task to close the socket.
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

/// A [`Transport`] over a WebSocket text stream.
///
/// Hosts without a Tokio runtime use [`WebSocketTransport::new`], which
/// starts a single-worker runtime owned by the transport. Hosts that
/// already run Tokio should pass their handle to
/// [`WebSocketTransport::with_handle`] instead; an owned runtime must not
/// be dropped from inside async code.
pub struct WebSocketTransport {
    runtime: IoRuntime,
    config: WebSocketConfig,
    next_id: u64,
    current: Option<ActiveConnection>,
    open: bool,
    /// Events produced on the caller's side (local closes), yielded
    /// before anything from the channel.
    local: VecDeque<TransportEvent>,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>,
}

impl WebSocketTransport {
    /// Creates a transport with its own I/O runtime.
    ///
    /// # Errors
    /// Returns [`TransportError::RuntimeUnavailable`] if the runtime can't
    /// be built.
    pub fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("tether-io")
            .enable_all()
            .build()
            .map_err(|e| TransportError::RuntimeUnavailable(e.to_string()))?;
        Ok(Self::build(IoRuntime::Owned(runtime), config))
    }

    /// Creates a transport that spawns its I/O task on `handle`.
    pub fn with_handle(handle: Handle, config: WebSocketConfig) -> Self {
        Self::build(IoRuntime::Shared(handle), config)
    }

    fn build(runtime: IoRuntime, config: WebSocketConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            config,
            next_id: 1,
            current: None,
            open: false,
            local: VecDeque::new(),
            events_tx,
            events_rx,
        }
    }
}

impl Transport for WebSocketTransport {
    fn open(&mut self, address: &str) -> Result<ConnectionId, TransportError> {
        let url = normalize_address(address)?;
        self.close();

        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let task = self.runtime.handle().spawn(drive_connection(
            id,
            url.clone(),
            self.config.connect_timeout,
            outgoing_rx,
            self.events_tx.clone(),
        ));

        tracing::info!(%id, %url, "connecting");
        self.current = Some(ActiveConnection {
            id,
            outgoing: outgoing_tx,
            task,
        });
        Ok(id)
    }

    fn send(&mut self, frame: Vec<u8>) {
        if !self.open {
            tracing::debug!(bytes = frame.len(), "send on closed transport ignored");
            return;
        }
        let Some(conn) = self.current.as_ref() else {
            tracing::debug!("send after close ignored");
            return;
        };
        if conn.outgoing.send(frame).is_err() {
            tracing::warn!("I/O task gone, frame dropped");
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    /// Reports the close at once. The I/O task is detached and shuts the
    /// socket down on its own; whatever it sends afterwards is stale.
    fn close(&mut self) {
        self.open = false;
        if let Some(conn) = self.current.take() {
            tracing::debug!(id = %conn.id, "close requested");
            drop(conn.outgoing);
            self.local
                .push_back(TransportEvent::Closed(TransportError::ClosedLocally));
        }
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.local.pop_front() {
            return Some(event);
        }
        loop {
            let (id, event) = self.events_rx.try_recv().ok()?;

            let is_current = self.current.as_ref().is_some_and(|c| c.id == id);
            if !is_current {
                tracing::trace!(%id, "dropping event from stale connection");
                continue;
            }

            match &event {
                TransportEvent::Opened => self.open = true,
                TransportEvent::Closed(_) => {
                    self.open = false;
                    self.current = None;
                }
                TransportEvent::Message(_) => {}
            }
            return Some(event);
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(conn) = self.current.take() {
            conn.task.abort();
        }
    }
}

/// Runs one connection and reports how it ended.
///
/// Whatever path `run_socket` takes, exactly one `Closed` is sent.
async fn drive_connection(
    id: ConnectionId,
    url: String,
    connect_timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    events: EventSender,
) {
    let reason = run_socket(id, &url, connect_timeout, &mut outgoing, &events).await;
    tracing::debug!(%id, %reason, "connection finished");
    let _ = events.send((id, TransportEvent::Closed(reason)));
}

async fn run_socket(
    id: ConnectionId,
    url: &str,
    connect_timeout: Duration,
    outgoing: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    events: &EventSender,
) -> TransportError {
    let connect = tokio::time::timeout(
        connect_timeout,
        tokio_tungstenite::connect_async(url),
    );

    // Nothing is queued before Opened, so the outgoing channel can only
    // resolve here because the caller closed it.
    let ws = tokio::select! {
        res = connect => match res {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => return TransportError::ConnectFailed(e.to_string()),
            Err(_) => {
                return TransportError::HandshakeTimeout(
                    connect_timeout.as_millis() as u64,
                )
            }
        },
        _ = outgoing.recv() => return TransportError::ClosedLocally,
    };

    tracing::info!(%id, url, "WebSocket connection established");
    if events.send((id, TransportEvent::Opened)).is_err() {
        return TransportError::ClosedLocally;
    }

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let frame = TransportEvent::Message(text.as_bytes().to_vec());
                    if events.send((id, frame)).is_err() {
                        return TransportError::ClosedLocally;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    let frame = TransportEvent::Message(data.to_vec());
                    if events.send((id, frame)).is_err() {
                        return TransportError::ClosedLocally;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return TransportError::ConnectionClosed(reason);
                }
                Some(Ok(_)) => {} // ping/pong/raw frame
                Some(Err(e)) => return TransportError::ReceiveFailed(e.to_string()),
                None => {
                    return TransportError::ConnectionClosed("stream ended".to_string())
                }
            },

            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    let text = String::from_utf8_lossy(&frame).into_owned();
                    if let Err(e) = sink.send(Message::text(text)).await {
                        return TransportError::SendFailed(e.to_string());
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return TransportError::ClosedLocally;
                }
            },
        }
    }
}
