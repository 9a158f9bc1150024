//! Error types for the session layer.

/// Errors that can occur while reading session state.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A slot config value exists but doesn't have the requested shape.
    #[error("slot config key {key:?} has the wrong type: {source}")]
    SlotConfigType {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
