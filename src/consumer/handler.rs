use crate::library::BoxedError;
use crate::message::MessageFrame;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure reported by a [`Handler`]
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Processing failed for now. The entry stays pending and is delivered again
    /// once it has been idle for longer than the idle threshold.
    #[error("message processing failed temporarily")]
    Retry(#[source] BoxedError),
    /// Processing can never succeed. The entry is moved to the dead-letter stream if
    /// one is configured and left pending otherwise.
    #[error("message has been rejected")]
    Reject(#[source] BoxedError),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Retry`]
    pub fn retry(error: impl Into<BoxedError>) -> Self {
        Self::Retry(error.into())
    }

    /// Shorthand for [`HandlerError::Reject`]
    pub fn reject(error: impl Into<BoxedError>) -> Self {
        Self::Reject(error.into())
    }
}

/// Outcome of processing a single message
pub type HandlerResult = Result<(), HandlerError>;

/// Application logic invoked for every message received by a consumer
///
/// Delivery is at-least-once. A message that has been processed but whose acknowledgement
/// got lost is delivered again, thus implementations should be idempotent.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Content of the messages expected by the handler
    type Content: DeserializeOwned + Send;

    /// Processes a single message. The token is cancelled when the consumer is asked to shut down,
    /// long running handlers may use it to abort early.
    async fn handle(
        &self,
        message: MessageFrame<Self::Content>,
        cancel: &CancellationToken,
    ) -> HandlerResult;
}
