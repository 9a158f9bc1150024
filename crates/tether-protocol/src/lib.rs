//! Wire protocol for Tether.
//!
//! This crate defines what the client and the multiworld server say to
//! each other:
//!
//! - **Types** ([`ClientRecord`], [`ServerRecord`], the id newtypes and
//!   shared structures): the records that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how records become
//!   envelopes and how frames become records.
//! - **Errors** ([`ProtocolError`]): what can go wrong on the way.
//!
//! # Architecture
//!
//! The protocol layer sits between the transport (raw frames) and the
//! engine (session state). It knows nothing about connections.
//!
//! ```text
//! Transport (frames) → Protocol (records) → Engine (session, ledger)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ClientRecord, ClientStatus, Connected, DataPackageObject, GameData, ItemId,
    ItemsHandling, JsonMessagePart, LocationId, NetworkItem, NetworkPlayer,
    NetworkVersion, RoomInfo, RoomUpdate, ServerRecord, SlotId,
};
