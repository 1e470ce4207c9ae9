//! Reliable, at-least-once consumption of append-only streams through consumer groups.
//!
//! The crate is split into a low-level [`library`] containing the storage abstraction, codecs
//! and helpers, the [`message`] frame exchanged between producers and consumers, the producer
//! side [`publisher`] and finally the [`consumer`] module which contains the actual protocol
//! logic (group coordination, crash recovery, polling and processing).

#![deny(missing_docs)]

pub mod consumer;
pub mod library;
pub mod message;
pub mod publisher;

pub use library::BoxedError;
