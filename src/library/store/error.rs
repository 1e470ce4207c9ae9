use crate::library::BoxedError;
use thiserror::Error;

/// Errors returned by [`StreamStore`](super::StreamStore) implementations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network or timeout failure while talking to the store, may succeed when retried
    #[error("connection to the stream store failed")]
    Connection(#[source] BoxedError),
    /// Consumer group has not been created on the stream (or the stream is gone)
    #[error("consumer group '{group}' does not exist on stream '{stream}'")]
    MissingGroup {
        /// Key of the stream
        stream: String,
        /// Name of the group
        group: String,
    },
    /// Stream does not exist and may not be created implicitly
    #[error("stream '{0}' does not exist")]
    MissingStream(String),
    /// Store replied with data that could not be interpreted
    #[error("unexpected reply from the stream store: {0}")]
    Protocol(String),
    /// Store rejected the command
    #[error("stream store rejected the command")]
    Command(#[source] BoxedError),
}

impl StoreError {
    /// Whether the operation may succeed when being retried as-is
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
