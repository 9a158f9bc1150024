//! Client configuration.

use std::time::Duration;

use tether_protocol::{ItemsHandling, NetworkVersion};
use tether_session::DEATH_LINK_TAG;
use tether_transport::WebSocketConfig;

use crate::ClientError;

/// Settings that stay fixed for the lifetime of an engine.
///
/// Start from `ClientConfig::new(game)` and override what you need:
///
/// ```rust
/// use std::time::Duration;
/// use tether::ClientConfig;
///
/// let config = ClientConfig::new("Test Game")
///     .with_death_link(true)
///     .with_reconnect_delay(Duration::from_secs(2));
/// assert_eq!(config.capability_tags(true), vec!["DeathLink".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Game name as the server knows it. Required.
    pub game: String,

    /// Version announced in the authentication record.
    pub protocol_version: NetworkVersion,

    /// Which items the server should send. Default: everything.
    pub items_handling: ItemsHandling,

    /// Extra capability tags sent with the authentication record.
    ///
    /// The death-link tag is managed by the engine; don't list it here.
    pub tags: Vec<String>,

    /// Whether death link starts enabled.
    pub death_link: bool,

    /// How long to wait after an unexpected close before reconnecting.
    ///
    /// Default: 5 seconds.
    pub reconnect_delay: Duration,

    /// How long the WebSocket handshake may take.
    ///
    /// Default: 10 seconds.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            game: String::new(),
            protocol_version: NetworkVersion::default(),
            items_handling: ItemsHandling::FULL,
            tags: Vec::new(),
            death_link: false,
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn new(game: impl Into<String>) -> Self {
        Self {
            game: game.into(),
            ..Default::default()
        }
    }

    pub fn with_death_link(mut self, enabled: bool) -> Self {
        self.death_link = enabled;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_protocol_version(mut self, version: NetworkVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Checks the config. Called by the engine builder.
    ///
    /// # Errors
    /// [`ClientError::InvalidConfig`] for an empty game name or unknown
    /// items-handling bits.
    pub fn validated(self) -> Result<Self, ClientError> {
        if self.game.trim().is_empty() {
            return Err(ClientError::InvalidConfig("game name is empty".into()));
        }
        if !ItemsHandling::FULL.contains(self.items_handling) {
            return Err(ClientError::InvalidConfig(format!(
                "unknown items_handling bits {:#05b}",
                self.items_handling.0
            )));
        }
        Ok(self)
    }

    /// Tags to announce, with the death-link tag added or removed.
    pub fn capability_tags(&self, death_link: bool) -> Vec<String> {
        let mut tags: Vec<String> = self
            .tags
            .iter()
            .filter(|tag| tag.as_str() != DEATH_LINK_TAG)
            .cloned()
            .collect();
        if death_link {
            tags.push(DEATH_LINK_TAG.to_string());
        }
        tags
    }

    /// Transport settings derived from this config.
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            connect_timeout: self.connect_timeout,
        }
    }
}
