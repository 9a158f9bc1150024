//! Callbacks from the engine to the host.
//!
//! The host registers at most one callback per event; registering again
//! replaces the previous one. Every callback runs synchronously on the
//! host's thread, inside `poll()` or inside the outbound call that caused
//! it, never concurrently with another.

use std::fmt;

use serde_json::{Map, Value};
use tether_protocol::{ItemId, JsonMessagePart, LocationId, SlotId};
use tether_session::SlotConfig;
use tether_transport::TransportError;

// ---------------------------------------------------------------------------
// Event payloads
// ---------------------------------------------------------------------------

/// One item granted to this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedItem {
    /// Absolute index in this slot's received-items list.
    pub index: u64,
    pub item: ItemId,
    /// The item's name, or `"Item <id>"` before the data package arrives.
    pub item_name: String,
    /// Where the item was found, in the sender's world.
    pub location: LocationId,
    pub sender: SlotId,
    /// The sender's display name, or `"Slot <n>"` if unknown.
    pub sender_name: String,
    pub flags: u32,
}

/// Why the connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The caller called `disconnect()`.
    Requested,
    /// The server refused authentication, with its reasons.
    Refused(Vec<String>),
    /// The transport closed or never opened.
    ConnectionLost(TransportError),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "disconnect requested"),
            Self::Refused(errors) => {
                write!(f, "authentication refused: {}", errors.join(", "))
            }
            Self::ConnectionLost(err) => write!(f, "connection lost: {err}"),
        }
    }
}

/// A chat line or server notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// The parts' text joined together.
    pub text: String,
    /// The server's message type (`"Chat"`, `"ItemSend"`, ...), if given.
    pub kind: Option<String>,
    /// The raw parts, for hosts that render colours or links.
    pub parts: Vec<JsonMessagePart>,
}

/// The answer to a `fetch()`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataResponse {
    pub request_id: u64,
    pub keys: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

type Callback<A> = Box<dyn FnMut(&A) + Send>;
type DeathCallback = Box<dyn FnMut(&str, &str) + Send>;

/// The registered callbacks. Unset callbacks are skipped.
#[derive(Default)]
pub struct EventBus {
    item_received: Option<Callback<ReceivedItem>>,
    connected: Option<Callback<SlotConfig>>,
    disconnected: Option<Callback<DisconnectReason>>,
    death_link: Option<DeathCallback>,
    chat: Option<Callback<ChatMessage>>,
    data_retrieved: Option<Callback<DataResponse>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per item, in index order.
    pub fn on_item_received(&mut self, f: impl FnMut(&ReceivedItem) + Send + 'static) {
        self.item_received = Some(Box::new(f));
    }

    /// Called after authentication, with the slot's config.
    pub fn on_connected(&mut self, f: impl FnMut(&SlotConfig) + Send + 'static) {
        self.connected = Some(Box::new(f));
    }

    pub fn on_disconnected(&mut self, f: impl FnMut(&DisconnectReason) + Send + 'static) {
        self.disconnected = Some(Box::new(f));
    }

    /// Called with `(source, cause)` when another client dies.
    pub fn on_death_link(&mut self, f: impl FnMut(&str, &str) + Send + 'static) {
        self.death_link = Some(Box::new(f));
    }

    pub fn on_chat_message(&mut self, f: impl FnMut(&ChatMessage) + Send + 'static) {
        self.chat = Some(Box::new(f));
    }

    pub fn on_data_retrieved(&mut self, f: impl FnMut(&DataResponse) + Send + 'static) {
        self.data_retrieved = Some(Box::new(f));
    }

    // -- Emitters (engine side) -------------------------------------------

    pub(crate) fn item_received(&mut self, item: &ReceivedItem) {
        if let Some(f) = self.item_received.as_mut() {
            f(item);
        }
    }

    pub(crate) fn connected(&mut self, config: &SlotConfig) {
        if let Some(f) = self.connected.as_mut() {
            f(config);
        }
    }

    pub(crate) fn disconnected(&mut self, reason: &DisconnectReason) {
        if let Some(f) = self.disconnected.as_mut() {
            f(reason);
        }
    }

    pub(crate) fn death_link(&mut self, source: &str, cause: &str) {
        if let Some(f) = self.death_link.as_mut() {
            f(source, cause);
        }
    }

    pub(crate) fn chat(&mut self, message: &ChatMessage) {
        if let Some(f) = self.chat.as_mut() {
            f(message);
        }
    }

    pub(crate) fn data_retrieved(&mut self, response: &DataResponse) {
        if let Some(f) = self.data_retrieved.as_mut() {
            f(response);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("item_received", &self.item_received.is_some())
            .field("connected", &self.connected.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .field("death_link", &self.death_link.is_some())
            .field("chat", &self.chat.is_some())
            .field("data_retrieved", &self.data_retrieved.is_some())
            .finish()
    }
}
