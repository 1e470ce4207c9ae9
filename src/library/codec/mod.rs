//! Conversion between typed messages and the raw bytes stored in stream entries
//!
//! Producers and consumers have to agree on a [`MessageCodec`]. Two implementations
//! are provided: [`JsonCodec`] which produces human readable payloads (handy when inspecting
//! a stream by hand) and [`BincodeCodec`] which produces compact binary payloads.

mod bincode;
mod json;

pub use self::bincode::*;
pub use json::*;

use crate::library::BoxedError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while encoding or decoding a message
#[derive(Debug, Error)]
pub enum CodecError {
    /// Message could not be serialized
    #[error("failed to encode message")]
    Encode(#[source] BoxedError),
    /// Payload bytes do not describe a valid message
    #[error("failed to decode message")]
    Decode(#[source] BoxedError),
}

/// Serialization format used for message payloads
pub trait MessageCodec: Send + Sync {
    /// Serializes a value into its wire format
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Parses the wire format back into a value
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}
