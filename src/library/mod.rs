//! Independent and project agnostic libraries
//!
//! Nothing in here knows about consumer groups being driven by a recovery engine or a poll loop.
//! The [`store`] module abstracts the broker, [`codec`] converts between bytes and typed
//! messages and [`helpers`] contains small utilities shared by everything else.

pub mod codec;
pub mod helpers;
pub mod store;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
