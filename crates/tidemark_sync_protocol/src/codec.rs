//! CBOR framing for protocol messages.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a message as CBOR.
pub fn to_cbor<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(message, &mut bytes)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a CBOR message.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}
