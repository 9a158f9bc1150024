//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means "these bytes or this record could not be
//! used". None of them end a session: the engine logs the error, drops
//! the frame or record, and carries on.

/// Errors that can occur while encoding or decoding wire records.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a record into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a value).
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The input parsed but isn't shaped like a frame or record.
    ///
    /// Either the frame isn't a JSON array, or one element of the array
    /// lacks a `cmd` field or has the wrong fields for its `cmd`.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A record carried a `cmd` this client doesn't know.
    ///
    /// Reported per record by
    /// [`Codec::decode_frame`](crate::Codec::decode_frame); the other
    /// records of the frame are unaffected.
    #[error("unknown record type {0:?}")]
    UnknownRecordType(String),
}
