//! # Tether
//!
//! Client-side synchronization core for multiworld item-randomizer
//! sessions.
//!
//! A game (or a bridge running next to it) builds one [`ProtocolEngine`],
//! connects it to the multiworld server and calls
//! [`poll()`](ProtocolEngine::poll) regularly. The engine takes care of
//! the handshake, reports location checks exactly once, delivers received
//! items exactly once and in order, reconnects after a drop, and relays
//! death-link notices. The game decides *when* a location is checked and
//! *what* a received item does.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether::prelude::*;
//!
//! # fn main() -> Result<(), ClientError> {
//! let mut engine = ProtocolEngine::websocket(ClientConfig::new("Test Game"))?;
//! engine.events_mut().on_item_received(|item| {
//!     println!("{} from {}", item.item_name, item.sender_name);
//! });
//! engine.connect("localhost:38281", "Alice", "")?;
//!
//! let mut ticker = PollTicker::with_rate(30);
//! loop {
//!     if ticker.due(std::time::Instant::now()).is_some() {
//!         engine.poll()?;
//!     }
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod dispatch;
mod engine;
mod error;
mod events;
mod reconnect;

pub use config::ClientConfig;
pub use engine::{EngineBuilder, Phase, ProtocolEngine};
pub use error::ClientError;
pub use events::{ChatMessage, DataResponse, DisconnectReason, EventBus, ReceivedItem};
pub use reconnect::ReconnectSupervisor;

pub use tether_protocol as protocol;
pub use tether_session as session;
pub use tether_tick as tick;
pub use tether_transport as transport;

/// Everything a host usually needs.
pub mod prelude {
    pub use crate::{
        ChatMessage, ClientConfig, ClientError, DataResponse, DisconnectReason, Phase,
        ProtocolEngine, ReceivedItem,
    };
    pub use tether_protocol::{ItemId, LocationId, SlotId};
    pub use tether_session::{SlotConfig, SyncSnapshot};
    pub use tether_tick::{PollConfig, PollTicker};
    pub use tether_transport::{
        MemoryPeer, MemoryTransport, Transport, WebSocketConfig, WebSocketTransport,
    };
}
