//! The protocol engine: connection lifecycle and outbound operations.
//!
//! One [`ProtocolEngine`] owns everything: the transport, the session,
//! the callbacks and the reconnect timer. Nothing happens in the
//! background. The host calls [`poll()`](ProtocolEngine::poll) at a fixed
//! cadence; each call drains transport events until it has handled one
//! inbound frame or one close, and every callback fires inside it.
//!
//! # Phases
//!
//! ```text
//!  connect() ──→ Connecting ──(Opened)──→ AwaitingRoomInfo
//!                    ↑                          │ RoomInfo / send Connect
//!                    │                          ▼
//!               (reconnect              AwaitingAuthResult ──(refused)──→ Disconnected
//!                after delay)                   │ Connected
//!                    │                          ▼
//!              Disconnected ←──(closed)── Authenticated
//! ```
//!
//! Inbound record handling lives in `dispatch.rs`.

use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

use tether_protocol::{ClientRecord, ClientStatus, Codec, JsonCodec, LocationId, SlotId};
use tether_session::{
    unix_time, ConnectionInfo, DeathNotice, Session, SlotConfig, SlotIdentity, SyncSnapshot,
    DEATH_LINK_TAG,
};
use tether_transport::{normalize_address, Transport, TransportEvent, WebSocketTransport};

use crate::events::{
    ChatMessage, DataResponse, DisconnectReason, EventBus, ReceivedItem,
};
use crate::reconnect::ReconnectSupervisor;
use crate::{ClientConfig, ClientError};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Where the engine is in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    /// `open()` started; waiting for the transport to come up.
    Connecting,
    /// Transport is up; waiting for the server to describe the room.
    AwaitingRoomInfo,
    /// Authentication record sent; waiting for accept or refusal.
    AwaitingAuthResult,
    Authenticated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingRoomInfo => "awaiting-room-info",
            Self::AwaitingAuthResult => "awaiting-auth-result",
            Self::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`ProtocolEngine`].
///
/// # Example
///
/// ```rust
/// use tether::prelude::*;
///
/// let (transport, _peer) = MemoryTransport::pair();
/// let engine = ProtocolEngine::builder(transport)
///     .config(ClientConfig::new("Test Game"))
///     .on_item_received(|item| println!("got {}", item.item_name))
///     .build()
///     .unwrap();
/// assert_eq!(engine.phase(), Phase::Disconnected);
/// ```
pub struct EngineBuilder<T, C = JsonCodec> {
    transport: T,
    codec: C,
    config: ClientConfig,
    events: EventBus,
}

impl<T: Transport> EngineBuilder<T, JsonCodec> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            codec: JsonCodec,
            config: ClientConfig::default(),
            events: EventBus::new(),
        }
    }
}

impl<T: Transport, C: Codec> EngineBuilder<T, C> {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the codec.
    pub fn codec<C2: Codec>(self, codec: C2) -> EngineBuilder<T, C2> {
        EngineBuilder {
            transport: self.transport,
            codec,
            config: self.config,
            events: self.events,
        }
    }

    pub fn on_item_received(mut self, f: impl FnMut(&ReceivedItem) + Send + 'static) -> Self {
        self.events.on_item_received(f);
        self
    }

    pub fn on_connected(mut self, f: impl FnMut(&SlotConfig) + Send + 'static) -> Self {
        self.events.on_connected(f);
        self
    }

    pub fn on_disconnected(
        mut self,
        f: impl FnMut(&DisconnectReason) + Send + 'static,
    ) -> Self {
        self.events.on_disconnected(f);
        self
    }

    pub fn on_death_link(mut self, f: impl FnMut(&str, &str) + Send + 'static) -> Self {
        self.events.on_death_link(f);
        self
    }

    pub fn on_chat_message(mut self, f: impl FnMut(&ChatMessage) + Send + 'static) -> Self {
        self.events.on_chat_message(f);
        self
    }

    pub fn on_data_retrieved(mut self, f: impl FnMut(&DataResponse) + Send + 'static) -> Self {
        self.events.on_data_retrieved(f);
        self
    }

    /// Validates the config and builds the engine.
    ///
    /// # Errors
    /// [`ClientError::InvalidConfig`] if the config fails validation.
    pub fn build(self) -> Result<ProtocolEngine<T, C>, ClientError> {
        let config = self.config.validated()?;
        let session = Session::new(config.protocol_version.clone(), config.death_link);
        tracing::debug!(game = %config.game, "protocol engine created");

        Ok(ProtocolEngine {
            transport: self.transport,
            codec: self.codec,
            reconnect: ReconnectSupervisor::new(config.reconnect_delay),
            config,
            phase: Phase::Disconnected,
            session,
            events: self.events,
            goal_sent: false,
            announced_death_link: false,
            next_request_id: 1,
            pending_fetches: HashSet::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// ProtocolEngine
// ---------------------------------------------------------------------------

/// Client-side protocol engine for one slot.
pub struct ProtocolEngine<T, C = JsonCodec> {
    pub(crate) transport: T,
    pub(crate) codec: C,
    pub(crate) config: ClientConfig,
    pub(crate) phase: Phase,
    pub(crate) session: Session,
    pub(crate) events: EventBus,
    pub(crate) reconnect: ReconnectSupervisor,
    /// Whether the goal status went out on the current connection.
    pub(crate) goal_sent: bool,
    /// Death-link state carried by the last capability tags sent.
    pub(crate) announced_death_link: bool,
    pub(crate) next_request_id: u64,
    pub(crate) pending_fetches: HashSet<u64>,
}

impl ProtocolEngine<WebSocketTransport> {
    /// Builds an engine on a WebSocket transport with its own I/O runtime.
    ///
    /// # Errors
    /// [`ClientError::Transport`] if the runtime can't be started,
    /// [`ClientError::InvalidConfig`] for a bad config.
    pub fn websocket(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = WebSocketTransport::new(config.websocket_config())?;
        EngineBuilder::new(transport).config(config).build()
    }
}

impl<T: Transport> ProtocolEngine<T> {
    pub fn builder(transport: T) -> EngineBuilder<T> {
        EngineBuilder::new(transport)
    }
}

impl<T: Transport, C: Codec> ProtocolEngine<T, C> {
    // =====================================================================
    // Lifecycle
    // =====================================================================

    /// Starts connecting to `address` as `slot_name`.
    ///
    /// Returns once the connection attempt has started; progress arrives
    /// through `poll()`. Connecting to the same server and slot as the
    /// current session keeps its ledger; any other target starts a fresh
    /// session. An active connection is closed first and reported through
    /// `OnDisconnected(Requested)`.
    ///
    /// # Errors
    /// [`ClientError::Transport`] if the address is malformed or the
    /// transport can't start the attempt. The reconnect timer is not
    /// armed in that case. A malformed address is rejected before
    /// anything changes: the current connection and session stay as they
    /// were.
    pub fn connect(
        &mut self,
        address: &str,
        slot_name: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        normalize_address(address)?;
        let info = ConnectionInfo::new(address, slot_name, password);

        if self.phase != Phase::Disconnected {
            tracing::info!(phase = %self.phase, "closing active connection before reconnecting");
            self.transport.close();
            self.phase = Phase::Disconnected;
            self.pending_fetches.clear();
            self.events.disconnected(&DisconnectReason::Requested);
        }

        if !self.session.accepts(&info) {
            tracing::info!(slot = %info.slot_name, "new connection target, starting fresh session");
            self.session = self.fresh_session();
        }
        self.session.bind(info);
        self.reconnect.reset();

        self.open_transport()
    }

    /// Closes the connection and forgets the session.
    ///
    /// Synchronous: the phase is `Disconnected` when this returns, and
    /// `OnDisconnected(Requested)` has fired if a connection was active.
    /// The transport's own close notification, when it arrives, is
    /// ignored.
    pub fn disconnect(&mut self) {
        let was_active = self.phase != Phase::Disconnected;

        self.transport.close();
        self.phase = Phase::Disconnected;
        self.reconnect.disarm();
        self.pending_fetches.clear();
        self.session = self.fresh_session();

        if was_active {
            tracing::info!("disconnected by request");
            self.events.disconnected(&DisconnectReason::Requested);
        }
    }

    /// Processes pending transport events. Call this regularly.
    ///
    /// Handles any number of `Opened` notifications and at most one
    /// inbound frame or close per call, so a burst of frames is spread
    /// over several polls. A due reconnect attempt starts here too.
    ///
    /// # Errors
    /// [`ClientError::AuthenticationRefused`] from the poll that handled
    /// the refusal. Nothing else is returned as an error: malformed input
    /// is logged and dropped, transport failures surface through
    /// `OnDisconnected`.
    pub fn poll(&mut self) -> Result<(), ClientError> {
        if self.phase == Phase::Disconnected && self.reconnect.due(Instant::now()) {
            self.attempt_reconnect();
        }

        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Opened => self.handle_opened(),
                TransportEvent::Message(frame) => return self.handle_frame(&frame),
                TransportEvent::Closed(err) => {
                    self.handle_closed(err);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    // =====================================================================
    // Outbound operations
    // =====================================================================

    /// Reports checked locations.
    ///
    /// New ids are marked checked immediately, whatever the connection
    /// state, and sent as one batch if authenticated. Otherwise they wait
    /// for the next authentication.
    pub fn report_checks(&mut self, ids: impl IntoIterator<Item = LocationId>) {
        let queued = self.session.ledger.queue_checks(ids);
        tracing::debug!(
            queued,
            pending = self.session.ledger.pending().len(),
            phase = %self.phase,
            "checks reported"
        );
        if queued > 0 && self.phase == Phase::Authenticated {
            self.flush_pending();
        }
    }

    /// Records goal completion; sends it at most once per connection.
    pub fn send_goal_complete(&mut self) {
        self.session.goal_reached = true;
        if self.phase == Phase::Authenticated && !self.goal_sent {
            self.send_goal_status();
        }
    }

    /// Turns death link on or off.
    ///
    /// While authenticated the new capability tags go to the server
    /// straight away.
    pub fn set_death_link_enabled(&mut self, enabled: bool) {
        if !self.session.death_link.set_enabled(enabled) {
            return;
        }
        tracing::info!(enabled, "death link toggled");
        if self.phase == Phase::Authenticated {
            self.send_capabilities();
        }
    }

    /// Broadcasts this client's death to the other death-link clients.
    ///
    /// Does nothing unless death link is enabled and the session is
    /// authenticated.
    pub fn send_death(&mut self, cause: &str) {
        if !self.session.death_link.is_enabled() {
            tracing::debug!("death link disabled, death not sent");
            return;
        }
        if self.phase != Phase::Authenticated {
            tracing::debug!(phase = %self.phase, "not authenticated, death not sent");
            return;
        }

        let time = unix_time();
        self.session.death_link.record_outbound(time);
        let notice = DeathNotice {
            time: Some(time),
            source: self.session.slot_name().to_string(),
            cause: cause.to_string(),
        };
        tracing::info!(cause, "sending death link");
        self.send(&ClientRecord::Bounce {
            games: Vec::new(),
            slots: Vec::new(),
            tags: vec![DEATH_LINK_TAG.to_string()],
            data: notice.to_data(),
        });
    }

    /// Sends a chat message.
    ///
    /// # Errors
    /// [`ClientError::NotAuthenticated`] unless authenticated.
    pub fn say(&mut self, text: &str) -> Result<(), ClientError> {
        self.require_authenticated()?;
        self.send(&ClientRecord::Say {
            text: text.to_string(),
        });
        Ok(())
    }

    /// Reads keys from the server's data storage.
    ///
    /// Returns the request id; the answer arrives through
    /// `OnDataRetrieved` carrying the same id. Requests still open when
    /// the connection drops are forgotten.
    ///
    /// # Errors
    /// [`ClientError::NotAuthenticated`] unless authenticated.
    pub fn fetch(
        &mut self,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<u64, ClientError> {
        self.require_authenticated()?;
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending_fetches.insert(request_id);

        self.send(&ClientRecord::Get {
            keys: keys.into_iter().map(Into::into).collect(),
            request_id,
        });
        Ok(request_id)
    }

    // =====================================================================
    // Accessors
    // =====================================================================

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the transport is up (any phase past `Connecting`).
    pub fn is_connected(&self) -> bool {
        matches!(
            self.phase,
            Phase::AwaitingRoomInfo | Phase::AwaitingAuthResult | Phase::Authenticated
        )
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == Phase::Authenticated
    }

    /// The slot config from the last authentication (empty before).
    pub fn slot_config(&self) -> &SlotConfig {
        &self.session.slot_config
    }

    pub fn is_location_checked(&self, id: LocationId) -> bool {
        self.session.ledger.is_checked(id)
    }

    /// Checks reported but not yet sent.
    pub fn pending_checks(&self) -> &[LocationId] {
        self.session.ledger.pending()
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.session.info.as_ref()
    }

    pub fn has_connection_info(&self) -> bool {
        self.session.info.is_some()
    }

    pub fn identity(&self) -> Option<SlotIdentity> {
        self.session.identity
    }

    /// Index of the next item the engine will deliver.
    pub fn next_item_index(&self) -> u64 {
        self.session.ledger.next_item_index()
    }

    /// Display name of `slot`, or `"Slot <n>"` if unknown.
    pub fn player_name(&self, slot: SlotId) -> String {
        self.session.names.player_display(slot)
    }

    pub fn death_link_enabled(&self) -> bool {
        self.session.death_link.is_enabled()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Registered callbacks, for changing them after build.
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn sync_snapshot(&self) -> SyncSnapshot {
        self.session.ledger.snapshot()
    }

    /// Merges a saved snapshot into the current session's ledger.
    pub fn restore_sync(&mut self, snapshot: &SyncSnapshot) {
        self.session.ledger.restore(snapshot);
        tracing::debug!(
            next_item_index = self.session.ledger.next_item_index(),
            checked = self.session.ledger.checked_count(),
            "sync snapshot restored"
        );
    }

    // =====================================================================
    // Internals
    // =====================================================================

    fn fresh_session(&self) -> Session {
        Session::new(
            self.config.protocol_version.clone(),
            self.session.death_link.is_enabled(),
        )
    }

    fn open_transport(&mut self) -> Result<(), ClientError> {
        let Some(address) = self.session.info.as_ref().map(|i| i.address.clone()) else {
            return Ok(());
        };
        // Anything still queued belongs to the previous connection.
        while let Some(event) = self.transport.poll_event() {
            tracing::trace!(?event, "discarding event from previous connection");
        }
        match self.transport.open(&address) {
            Ok(conn_id) => {
                self.phase = Phase::Connecting;
                self.goal_sent = false;
                tracing::info!(%conn_id, %address, "connecting");
                Ok(())
            }
            Err(e) => {
                self.phase = Phase::Disconnected;
                tracing::warn!(%address, error = %e, "could not start connection");
                Err(e.into())
            }
        }
    }

    fn attempt_reconnect(&mut self) {
        if !self.has_connection_info() {
            return;
        }
        tracing::info!(attempt = self.reconnect.attempts(), "reconnecting");
        if self.open_transport().is_err() {
            self.reconnect.schedule(Instant::now());
        }
    }

    fn handle_opened(&mut self) {
        if self.phase == Phase::Connecting {
            self.phase = Phase::AwaitingRoomInfo;
            tracing::info!("connection open, waiting for room info");
        } else {
            tracing::debug!(phase = %self.phase, "ignoring open event");
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Result<(), ClientError> {
        let records = match self.codec.decode_frame(frame) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(bytes = frame.len(), error = %e, "dropping malformed frame");
                return Ok(());
            }
        };

        for record in records {
            match record {
                Ok(record) => self.dispatch(record)?,
                Err(tether_protocol::ProtocolError::UnknownRecordType(cmd)) => {
                    tracing::debug!(%cmd, "ignoring unknown record type");
                }
                Err(e) => tracing::warn!(error = %e, "dropping malformed record"),
            }
        }
        Ok(())
    }

    fn handle_closed(&mut self, err: tether_transport::TransportError) {
        if self.phase == Phase::Disconnected {
            tracing::debug!(error = %err, "close after disconnect ignored");
            return;
        }

        let was = self.phase;
        self.phase = Phase::Disconnected;
        self.pending_fetches.clear();
        tracing::warn!(phase = %was, error = %err, "connection lost");

        if self.has_connection_info() {
            self.reconnect.schedule(Instant::now());
            tracing::info!(
                delay_ms = self.reconnect.delay().as_millis() as u64,
                "reconnect scheduled"
            );
        }
        self.events
            .disconnected(&DisconnectReason::ConnectionLost(err));
    }

    pub(crate) fn send(&mut self, record: &ClientRecord) {
        match self.codec.encode_record(record) {
            Ok(frame) => {
                tracing::trace!(cmd = record.command(), bytes = frame.len(), "sending record");
                self.transport.send(frame);
            }
            Err(e) => {
                tracing::warn!(cmd = record.command(), error = %e, "could not encode record");
            }
        }
    }

    /// Sends the current capability tags on a live session.
    pub(crate) fn send_capabilities(&mut self) {
        let enabled = self.session.death_link.is_enabled();
        self.send(&ClientRecord::ConnectUpdate {
            items_handling: self.config.items_handling,
            tags: self.config.capability_tags(enabled),
        });
        self.announced_death_link = enabled;
    }

    pub(crate) fn flush_pending(&mut self) {
        let locations = self.session.ledger.take_pending();
        if !locations.is_empty() {
            self.send(&ClientRecord::LocationChecks { locations });
        }
    }

    pub(crate) fn send_goal_status(&mut self) {
        tracing::info!("reporting goal complete");
        self.send(&ClientRecord::StatusUpdate {
            status: ClientStatus::Goal,
        });
        self.goal_sent = true;
    }

    fn require_authenticated(&self) -> Result<(), ClientError> {
        if self.phase == Phase::Authenticated {
            Ok(())
        } else {
            Err(ClientError::NotAuthenticated)
        }
    }
}

impl<T, C> fmt::Debug for ProtocolEngine<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("phase", &self.phase)
            .field("game", &self.config.game)
            .field("slot", &self.session.slot_name())
            .field("next_item_index", &self.session.ledger.next_item_index())
            .finish_non_exhaustive()
    }
}
