//! Codec trait and the JSON implementation.
//!
//! The engine never touches `serde_json` directly. It holds something
//! that implements [`Codec`] and asks it for two things: turn one
//! outbound record into an envelope, and split one inbound frame into
//! records.
//!
//! ## Envelopes
//!
//! Every frame on the wire is a JSON array of records. This client always
//! sends exactly one record per array. Servers may batch several records
//! into one frame, so [`Codec::decode_frame`] returns one result per
//! element: a bad element does not poison its neighbours.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{ClientRecord, ProtocolError, ServerRecord};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` lets the engine that owns a codec move to any
/// thread.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or don't
    /// match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Wraps one record in a single-element envelope.
    fn encode_record(&self, record: &ClientRecord) -> Result<Vec<u8>, ProtocolError> {
        self.encode(&[record])
    }

    /// Splits an inbound frame into records.
    ///
    /// The outer `Err` means the frame as a whole is unusable (not an
    /// array). Each inner `Err` covers one element: a missing `cmd`, fields
    /// that don't fit the `cmd`, or a `cmd` this client doesn't know
    /// ([`ProtocolError::UnknownRecordType`]).
    fn decode_frame(
        &self,
        data: &[u8],
    ) -> Result<Vec<Result<ServerRecord, ProtocolError>>, ProtocolError> {
        let elements: Vec<Value> = self.decode(data).map_err(|e| {
            ProtocolError::Malformed(format!("frame is not an array of records: {e}"))
        })?;
        Ok(elements.into_iter().map(decode_record).collect())
    }
}

fn decode_record(value: Value) -> Result<ServerRecord, ProtocolError> {
    let Some(cmd) = value.get("cmd").and_then(Value::as_str).map(str::to_owned) else {
        return Err(ProtocolError::Malformed("record has no cmd field".into()));
    };

    match serde_json::from_value::<ServerRecord>(value) {
        Ok(ServerRecord::Unknown) => Err(ProtocolError::UnknownRecordType(cmd)),
        Ok(record) => Ok(record),
        Err(e) => Err(ProtocolError::Malformed(format!("{cmd}: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`), the only format the
/// multiworld server speaks.
///
/// ## Example
///
/// ```rust
/// use tether_protocol::{ClientRecord, Codec, JsonCodec, ServerRecord};
///
/// let codec = JsonCodec;
///
/// let bytes = codec.encode_record(&ClientRecord::Sync).unwrap();
/// assert_eq!(bytes, br#"[{"cmd":"Sync"}]"#);
///
/// let records = codec
///     .decode_frame(br#"[{"cmd":"ConnectionRefused","errors":["InvalidSlot"]}]"#)
///     .unwrap();
/// assert!(matches!(
///     records[0],
///     Ok(ServerRecord::ConnectionRefused { .. })
/// ));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
