//! Abstraction over append-only logs with server side consumer group bookkeeping
//!
//! Entries are appended to a stream and stored in a log-like data structure. Consumers
//! read from it as members of a named consumer group. Each entry is delivered to only
//! one consumer within the group, which then owns it in the group's pending entries list
//! (PEL) until it acknowledges the entry. Unacknowledged entries may be claimed by other
//! consumers once they have been idle for long enough. This ensures that no entry is left
//! unprocessed even when a consumer crashes mid-way.
//!
//! All of the above is performed atomically by the store. Implementations of the
//! [`StreamStore`] trait merely translate the operations to the underlying broker:
//!
//! - [`RedisStreamStore`](redis::RedisStreamStore) uses [Redis Streams](https://redis.io/topics/streams-intro)
//! - [`MemoryStreamStore`] keeps everything in process memory

mod entry;
mod error;
mod memory;
pub mod redis;

pub use entry::*;
pub use error::*;
pub use memory::*;

use async_trait::async_trait;
use std::time::Duration;

/// Append-only log with consumer group support
///
/// Implementations are expected to be safe for concurrent use by multiple consumers.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Appends a new entry consisting of the given field/value pairs and returns its identifier
    async fn append(&self, stream: &str, fields: &[(&str, &[u8])]) -> Result<EntryId, StoreError>;

    /// Creates a consumer group starting at the given location.
    ///
    /// An already existing group is not an error and reported as [`GroupCreation::AlreadyExists`].
    /// When `create_stream` is set, a missing stream is created on the fly.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &GroupStart,
        create_stream: bool,
    ) -> Result<GroupCreation, StoreError>;

    /// Reads up to `count` entries for a consumer, marking them as pending for it
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        position: &ReadPosition,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError>;

    /// Number of entries pending within the group
    async fn pending_summary(&self, stream: &str, group: &str) -> Result<usize, StoreError>;

    /// Lists up to `count` pending entries in id order, beginning at `start` (inclusive)
    /// and optionally restricted to a single consumer
    async fn pending_detail(
        &self,
        stream: &str,
        group: &str,
        consumer: Option<&str>,
        start: Option<&EntryId>,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StoreError>;

    /// Transfers ownership of pending entries idle for at least `min_idle` to `consumer`.
    ///
    /// Only entries that have actually been claimed are returned.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<StreamEntry>, StoreError>;

    /// Removes entries from the pending entries list and returns how many have been removed
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize, StoreError>;
}
