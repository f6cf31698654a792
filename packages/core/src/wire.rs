//! `MsgPack` encode/decode helpers shared by both planes.
//!
//! All frames use named serialization (`rmp_serde::to_vec_named()`) so
//! field names travel on the wire and decoding stays tolerant of fields
//! added by newer peers.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Failure to encode or decode a wire frame.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("could not encode frame: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("could not decode frame: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Serializes a message to named `MsgPack` bytes.
///
/// # Errors
///
/// Returns [`WireError::Encode`] if the value cannot be serialized.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

/// Deserializes a message from `MsgPack` bytes.
///
/// # Errors
///
/// Returns [`WireError::Decode`] if the bytes are not a valid frame.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
