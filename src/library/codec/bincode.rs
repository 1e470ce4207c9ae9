use super::{CodecError, MessageCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// [`MessageCodec`] based on [`bincode`](::bincode)
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl MessageCodec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        ::bincode::serialize(value).map_err(|e| CodecError::Encode(e.into()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        ::bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.into()))
    }
}
