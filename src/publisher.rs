//! Producer side counterpart to the [`consumer`](crate::consumer) module

use crate::consumer::DEFAULT_PAYLOAD_FIELD;
use crate::library::codec::{CodecError, MessageCodec};
use crate::library::store::{EntryId, StoreError, StreamStore};
use crate::message::MessageFrame;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{instrument, trace};

/// Errors that may occur while publishing a message
#[derive(Debug, Error)]
pub enum PublishError {
    /// Content could not be encoded
    #[error("unable to encode message")]
    Encode(#[from] CodecError),
    /// Encoded message could not be appended to the stream
    #[error("unable to append message to stream")]
    Store(#[from] StoreError),
}

/// Publishes [`MessageFrames`](MessageFrame) to a stream
///
/// Each message is wrapped into a frame carrying the identifier of the producer and the
/// time of publication, encoded with the configured [`MessageCodec`] and appended as the
/// single payload field of a new stream entry.
pub struct MessagePublisher<S, C> {
    store: Arc<S>,
    codec: C,
    stream: String,
    producer: String,
    payload_field: String,
}

impl<S, C> MessagePublisher<S, C>
where
    S: StreamStore,
    C: MessageCodec,
{
    /// Creates a new publisher for a stream, identifying itself as `producer`
    pub fn new(
        store: Arc<S>,
        codec: C,
        stream: impl Into<String>,
        producer: impl Into<String>,
    ) -> Self {
        Self {
            store,
            codec,
            stream: stream.into(),
            producer: producer.into(),
            payload_field: DEFAULT_PAYLOAD_FIELD.to_owned(),
        }
    }

    /// Overrides the name of the field carrying the encoded message
    pub fn with_payload_field(mut self, field: impl Into<String>) -> Self {
        self.payload_field = field.into();
        self
    }

    /// Stream key this publisher appends to
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Publishes a message and returns the identifier of the created entry
    #[instrument(err, skip(self, content), fields(stream = %self.stream, producer = %self.producer))]
    pub async fn publish<T: Serialize + Sync>(&self, content: &T) -> Result<EntryId, PublishError> {
        let frame = MessageFrame::new(self.producer.as_str(), content);
        trace!("Encoding message");
        let payload = self.codec.encode(&frame)?;

        let id = self
            .store
            .append(&self.stream, &[(self.payload_field.as_str(), payload.as_slice())])
            .await?;

        trace!(%id, "Published message");
        Ok(id)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::codec::JsonCodec;
    use crate::library::store::MemoryStreamStore;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn wrap_content_into_frame() {
        let store = Arc::new(MemoryStreamStore::new());
        let publisher = MessagePublisher::new(store.clone(), JsonCodec, "orders", "shop-1");

        let id = publisher.publish(&"towel").await.unwrap();

        let entries = store.entries("orders");
        let payload = entries[0].field(DEFAULT_PAYLOAD_FIELD).unwrap();
        let frame: MessageFrame<String> = JsonCodec.decode(payload).unwrap();

        assert_eq!(entries[0].id, id);
        assert_eq!(frame.producer(), "shop-1");
        assert_eq!(frame.into_inner(), "towel");
    }

    #[tokio::test]
    async fn use_custom_payload_field() {
        let store = Arc::new(MemoryStreamStore::new());
        let publisher = MessagePublisher::new(store.clone(), JsonCodec, "orders", "shop-1")
            .with_payload_field("data");

        publisher.publish(&1).await.unwrap();

        let entries = store.entries("orders");
        assert!(entries[0].field("data").is_some());
        assert!(entries[0].field(DEFAULT_PAYLOAD_FIELD).is_none());
    }

    #[tokio::test]
    async fn surface_store_failures() {
        let store = Arc::new(MemoryStreamStore::new());
        let publisher = MessagePublisher::new(store.clone(), JsonCodec, "orders", "shop-1");
        store.inject_connection_failures(1);

        let result = publisher.publish(&1).await;

        assert!(matches!(result, Err(PublishError::Store(StoreError::Connection(_)))));
        assert!(store.is_empty("orders"));
    }
}
