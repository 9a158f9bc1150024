//! Death link: a cooperative "everyone dies together" side channel.
//!
//! Deaths travel as broadcast records tagged [`DEATH_LINK_TAG`]. The server
//! echoes a broadcast back to its sender too, so the client remembers the
//! timestamp of its own last notice and drops the echo.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag on death broadcasts, and the capability tag that opts a client in.
pub const DEATH_LINK_TAG: &str = "DeathLink";

/// The payload of a death broadcast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeathNotice {
    /// Unix time in seconds, as a float.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    pub source: String,
    pub cause: String,
}

impl DeathNotice {
    /// Reads a notice from a broadcast's `data` field.
    ///
    /// Returns `None` if `data` isn't an object of the right shape.
    pub fn from_data(data: &Value) -> Option<Self> {
        if !data.is_object() {
            return None;
        }
        Self::deserialize(data).ok()
    }

    pub fn to_data(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Opt-in flag plus the timestamp of the last notice this client sent.
#[derive(Debug, Clone, Default)]
pub struct DeathLinkState {
    enabled: bool,
    last_outbound: Option<f64>,
}

impl DeathLinkState {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            last_outbound: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sets the flag. Returns `true` if it changed.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        let changed = self.enabled != enabled;
        self.enabled = enabled;
        changed
    }

    /// Records the timestamp of a notice about to be sent.
    pub fn record_outbound(&mut self, time: f64) {
        self.last_outbound = Some(time);
    }

    pub fn last_outbound_timestamp(&self) -> Option<f64> {
        self.last_outbound
    }

    /// Whether an inbound notice stamped `time` should reach the caller.
    ///
    /// False while disabled, and for the echo of our own last notice.
    /// A notice without a timestamp can't be an echo and is delivered.
    pub fn should_deliver(&self, time: Option<f64>) -> bool {
        if !self.enabled {
            return false;
        }
        match (time, self.last_outbound) {
            (Some(time), Some(last)) => time != last,
            _ => true,
        }
    }
}

/// Current Unix time in seconds.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
