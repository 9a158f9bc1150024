//! Wire records for the multiworld protocol.
//!
//! Every record is a JSON object with a `cmd` field naming its type.
//! [`ClientRecord`] lists what this client sends, [`ServerRecord`] what it
//! understands from the server. The server sends more record types than
//! this; anything else decodes to [`ServerRecord::Unknown`].
//!
//! Most inbound fields carry `#[serde(default)]`: servers omit fields
//! freely, and a missing list is the same as an empty one.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// An opaque location id. Serialized as a plain number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LocationId(pub i64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L-{}", self.0)
    }
}

/// An item id. Serialized as a plain number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I-{}", self.0)
    }
}

/// A slot number within the multiworld. Slot 0 is the server itself.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SlotId(pub i64);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Shared structures
// ---------------------------------------------------------------------------

/// Protocol version sent with the authentication record.
///
/// The server expects the object to carry `"class": "Version"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    #[serde(default = "version_class")]
    pub class: String,
}

fn version_class() -> String {
    "Version".to_string()
}

impl NetworkVersion {
    pub fn new(major: u32, minor: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
            class: version_class(),
        }
    }
}

impl Default for NetworkVersion {
    fn default() -> Self {
        Self::new(0, 5, 1)
    }
}

impl fmt::Display for NetworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// Which items the server should send to this client (a bit set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemsHandling(pub u8);

impl ItemsHandling {
    /// Items found in other worlds.
    pub const REMOTE: Self = Self(0b001);
    /// Items found in this client's own world.
    pub const OWN_WORLD: Self = Self(0b010);
    /// The slot's starting inventory.
    pub const STARTING_INVENTORY: Self = Self(0b100);
    /// Full remote inventory: everything above.
    pub const FULL: Self = Self(0b111);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for ItemsHandling {
    fn default() -> Self {
        Self::FULL
    }
}

/// Client progress reported with [`ClientRecord::StatusUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ClientStatus {
    Unknown,
    Connected,
    Ready,
    Playing,
    /// The slot's goal is complete.
    Goal,
}

impl From<ClientStatus> for u8 {
    fn from(status: ClientStatus) -> Self {
        match status {
            ClientStatus::Unknown => 0,
            ClientStatus::Connected => 5,
            ClientStatus::Ready => 10,
            ClientStatus::Playing => 20,
            ClientStatus::Goal => 30,
        }
    }
}

impl TryFrom<u8> for ClientStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            5 => Ok(Self::Connected),
            10 => Ok(Self::Ready),
            20 => Ok(Self::Playing),
            30 => Ok(Self::Goal),
            other => Err(format!("unknown client status {other}")),
        }
    }
}

/// One item grant as the server describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkItem {
    pub item: ItemId,
    /// Where the item was found (in the sender's world).
    pub location: LocationId,
    /// The slot whose world held the item.
    pub player: SlotId,
    #[serde(default)]
    pub flags: u32,
}

/// One participant of the multiworld.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPlayer {
    pub team: i64,
    pub slot: SlotId,
    pub alias: String,
    pub name: String,
}

impl NetworkPlayer {
    /// The name to show: the alias if set, else the slot name.
    pub fn display_name(&self) -> &str {
        if self.alias.is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }
}

/// One fragment of a chat/notification line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonMessagePart {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<SlotId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Name tables for one game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameData {
    pub item_name_to_id: HashMap<String, ItemId>,
    pub location_name_to_id: HashMap<String, LocationId>,
    pub checksum: Option<String>,
}

/// The `data` field of a data-package record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPackageObject {
    pub games: HashMap<String, GameData>,
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Records this client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum ClientRecord {
    /// Authenticate as a slot.
    Connect {
        password: String,
        game: String,
        name: String,
        uuid: String,
        version: NetworkVersion,
        items_handling: ItemsHandling,
        tags: Vec<String>,
        slot_data: bool,
    },

    /// Change items handling or tags on a live session.
    ConnectUpdate {
        items_handling: ItemsHandling,
        tags: Vec<String>,
    },

    /// Ask for the full received-items list again.
    Sync,

    /// Report checked locations.
    LocationChecks { locations: Vec<LocationId> },

    /// Report client progress (goal completion).
    StatusUpdate { status: ClientStatus },

    /// Chat.
    Say { text: String },

    /// Ask for the name tables of some games.
    GetDataPackage { games: Vec<String> },

    /// Broadcast to other clients selected by game, slot or tag.
    Bounce {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        games: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        slots: Vec<SlotId>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
        data: Value,
    },

    /// Read keys from the server's data storage.
    ///
    /// The server echoes unknown fields back in the reply, which is how
    /// `request_id` finds its way into [`ServerRecord::Retrieved`].
    Get { keys: Vec<String>, request_id: u64 },
}

impl ClientRecord {
    /// The `cmd` discriminator, for logging.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "Connect",
            Self::ConnectUpdate { .. } => "ConnectUpdate",
            Self::Sync => "Sync",
            Self::LocationChecks { .. } => "LocationChecks",
            Self::StatusUpdate { .. } => "StatusUpdate",
            Self::Say { .. } => "Say",
            Self::GetDataPackage { .. } => "GetDataPackage",
            Self::Bounce { .. } => "Bounce",
            Self::Get { .. } => "Get",
        }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// First record of every connection: describes the room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomInfo {
    pub version: Option<NetworkVersion>,
    pub generator_version: Option<NetworkVersion>,
    pub tags: Vec<String>,
    pub password: bool,
    pub hint_cost: i64,
    pub location_check_points: i64,
    pub games: Vec<String>,
    pub datapackage_checksums: HashMap<String, String>,
    pub seed_name: String,
    pub time: f64,
}

/// The server accepted the authentication record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Connected {
    pub team: i64,
    pub slot: SlotId,
    pub players: Vec<NetworkPlayer>,
    pub missing_locations: Vec<LocationId>,
    pub checked_locations: Vec<LocationId>,
    pub slot_data: Option<Map<String, Value>>,
    pub hint_points: i64,
}

/// Partial room state update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomUpdate {
    pub checked_locations: Vec<LocationId>,
    pub players: Option<Vec<NetworkPlayer>>,
    pub hint_points: Option<i64>,
}

/// Records this client understands from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum ServerRecord {
    RoomInfo(RoomInfo),

    /// The server refused the authentication record.
    ConnectionRefused {
        #[serde(default)]
        errors: Vec<String>,
    },

    Connected(Connected),

    /// A run of item grants starting at absolute index `index`.
    ReceivedItems {
        index: u64,
        #[serde(default)]
        items: Vec<NetworkItem>,
    },

    RoomUpdate(RoomUpdate),

    /// Chat or a server notification.
    #[serde(rename = "PrintJSON")]
    PrintJson {
        #[serde(default)]
        data: Vec<JsonMessagePart>,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },

    DataPackage { data: DataPackageObject },

    /// A broadcast from another client (death link travels this way).
    Bounced {
        #[serde(default)]
        games: Vec<String>,
        #[serde(default)]
        slots: Vec<SlotId>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        data: Value,
    },

    /// Reply to [`ClientRecord::Get`].
    Retrieved {
        #[serde(default)]
        keys: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },

    /// The server could not process something this client sent.
    InvalidPacket {
        #[serde(rename = "type", default)]
        kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_cmd: Option<String>,
        #[serde(default)]
        text: String,
    },

    /// Any `cmd` not listed above.
    #[serde(other)]
    Unknown,
}

impl ServerRecord {
    /// The `cmd` discriminator, for logging.
    pub fn command(&self) -> &'static str {
        match self {
            Self::RoomInfo(_) => "RoomInfo",
            Self::ConnectionRefused { .. } => "ConnectionRefused",
            Self::Connected(_) => "Connected",
            Self::ReceivedItems { .. } => "ReceivedItems",
            Self::RoomUpdate(_) => "RoomUpdate",
            Self::PrintJson { .. } => "PrintJSON",
            Self::DataPackage { .. } => "DataPackage",
            Self::Bounced { .. } => "Bounced",
            Self::Retrieved { .. } => "Retrieved",
            Self::InvalidPacket { .. } => "InvalidPacket",
            Self::Unknown => "Unknown",
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
