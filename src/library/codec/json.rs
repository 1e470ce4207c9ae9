use super::{CodecError, MessageCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// [`MessageCodec`] based on [`serde_json`]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    /// Serializes the value using [`serde_json::to_vec`]
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.into()))
    }

    /// Parses the payload using [`serde_json::from_slice`]
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.into()))
    }
}
