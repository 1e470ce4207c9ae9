//! Reliable consumption of streams through consumer groups
//!
//! A [`StreamConsumer`] joins a consumer group under a stable name, reclaims work that has been
//! left pending by crashed consumers and then continuously polls for new entries. Each entry is
//! decoded into a [`MessageFrame`](crate::message::MessageFrame) and handed to a [`Handler`].
//! Entries are acknowledged once the handler succeeds, everything else stays in the pending entries
//! list until it is reclaimed or moved to a dead-letter stream.
//!
//! ```ignore
//! let store = Arc::new(RedisStreamStore::new(MultiplexedRedisFactory::new("redis://localhost/")?));
//! let options = ConsumerOptions::new("orders", ConsumerIdentity::new("billing", "billing-1"));
//! let consumer = StreamConsumer::new(store, JsonCodec, options);
//!
//! consumer.run(&OrderHandler, &cancel).await?;
//! ```

mod dead_letter;
mod engine;
mod group;
mod handler;
mod options;
mod pipeline;
mod poll;
mod recovery;
mod stats;

pub use dead_letter::*;
pub use engine::*;
pub use group::*;
pub use handler::*;
pub use options::*;
pub use pipeline::*;
pub use poll::*;
pub use recovery::*;
pub use stats::*;
