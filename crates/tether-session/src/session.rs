//! Session types: what the client knows about its slot.
//!
//! The engine always holds one [`Session`]. It starts unbound, so checks
//! and goal completion reported before the first `connect()` are kept,
//! and is bound to a [`ConnectionInfo`] by `connect()`. A caller
//! `disconnect()` replaces it with a fresh one. Transport drops leave it
//! alone: the reconnect supervisor reuses its [`ConnectionInfo`] and the
//! [`SyncLedger`] it carries is what keeps a reconnect from re-applying
//! items.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tether_protocol::{NetworkVersion, SlotId};

use crate::{DeathLinkState, NameRegistry, SessionError, SyncLedger};

// ---------------------------------------------------------------------------
// ConnectionInfo
// ---------------------------------------------------------------------------

/// Where to connect and as whom. Supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Server address as the caller gave it (`host:port` or a URL).
    pub address: String,
    pub slot_name: String,
    pub password: String,
}

impl ConnectionInfo {
    pub fn new(
        address: impl Into<String>,
        slot_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            slot_name: slot_name.into(),
            password: password.into(),
        }
    }

    /// Whether `other` names the same server and slot.
    ///
    /// The password is ignored: a corrected password still refers to the
    /// same slot, and its ledger stays valid.
    pub fn same_target(&self, other: &ConnectionInfo) -> bool {
        self.address == other.address && self.slot_name == other.slot_name
    }
}

// ---------------------------------------------------------------------------
// SlotIdentity
// ---------------------------------------------------------------------------

/// What the server told us about ourselves when it accepted us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotIdentity {
    pub team: i64,
    pub slot: SlotId,
}

// ---------------------------------------------------------------------------
// SlotConfig
// ---------------------------------------------------------------------------

/// Per-slot options the server delivers once at authentication.
///
/// The server treats this as an opaque JSON object; games decide what
/// goes in it. Read values with [`SlotConfig::get`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotConfig {
    values: Map<String, Value>,
}

impl SlotConfig {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Reads `key` as a `T`.
    ///
    /// Returns `Ok(None)` when the key is absent.
    ///
    /// # Errors
    /// [`SessionError::SlotConfigType`] when the key exists but its value
    /// can't be read as a `T`.
    ///
    /// ```rust
    /// use serde_json::json;
    /// use tether_session::SlotConfig;
    ///
    /// let config = SlotConfig::new(
    ///     json!({"goal": 2, "death_link": true}).as_object().unwrap().clone(),
    /// );
    /// assert_eq!(config.get::<u32>("goal").unwrap(), Some(2));
    /// assert_eq!(config.get::<bool>("missing").unwrap(), None);
    /// assert!(config.get::<String>("goal").is_err());
    /// ```
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };
        T::deserialize(value)
            .map(Some)
            .map_err(|source| SessionError::SlotConfigType {
                key: key.to_string(),
                source,
            })
    }

    /// The raw JSON value of `key`.
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything the client remembers about its slot.
#[derive(Debug, Clone)]
pub struct Session {
    /// Where and as whom to connect. `None` until the first `connect()`.
    pub info: Option<ConnectionInfo>,

    /// Protocol version announced in the authentication record.
    pub version: NetworkVersion,

    /// Random id for this client, sent with every authentication record.
    ///
    /// Generated once per session so the server sees the same client
    /// across reconnects. 32 hex characters (128 bits).
    pub client_uuid: String,

    /// Team and slot number, set once the server accepts us.
    ///
    /// Kept after a transport drop; overwritten by the next accept.
    pub identity: Option<SlotIdentity>,

    pub slot_config: SlotConfig,

    pub ledger: SyncLedger,

    pub death_link: DeathLinkState,

    pub names: NameRegistry,

    /// Set once the caller reports goal completion. Never cleared.
    pub goal_reached: bool,
}

impl Session {
    /// Creates an unbound session.
    pub fn new(version: NetworkVersion, death_link: bool) -> Self {
        Self {
            info: None,
            version,
            client_uuid: generate_uuid(),
            identity: None,
            slot_config: SlotConfig::default(),
            ledger: SyncLedger::default(),
            death_link: DeathLinkState::new(death_link),
            names: NameRegistry::default(),
            goal_reached: false,
        }
    }

    /// Whether the state in this session may be carried to `info`.
    ///
    /// True for an unbound session and for one bound to the same server
    /// and slot.
    pub fn accepts(&self, info: &ConnectionInfo) -> bool {
        match &self.info {
            None => true,
            Some(current) => current.same_target(info),
        }
    }

    /// Binds (or rebinds) the session to `info`, keeping all state.
    pub fn bind(&mut self, info: ConnectionInfo) {
        self.info = Some(info);
    }

    /// The slot name, or an empty string while unbound.
    pub fn slot_name(&self) -> &str {
        self.info.as_ref().map_or("", |info| info.slot_name.as_str())
    }
}

fn generate_uuid() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
