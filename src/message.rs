//! Envelope exchanged between producers and consumers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Frame around a message containing additional context and information
///
/// The frame is what actually gets encoded into the payload field of a stream entry.
/// Handlers receive it fully decoded and may access the content directly through [`Deref`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MessageFrame<T> {
    producer: String,
    timestamp: DateTime<Utc>,
    content: T,
}

impl<T> MessageFrame<T> {
    /// Creates a new instance with a publication time of `Utc::now()`
    pub fn new(producer: impl Into<String>, content: T) -> Self {
        Self {
            producer: producer.into(),
            timestamp: Utc::now(),
            content,
        }
    }

    /// Identifier of the producer which published the message
    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Returns the instant at which the message was originally published
    pub fn publication_time(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    /// Consumes the `MessageFrame`, returning the wrapped content
    pub fn into_inner(self) -> T {
        self.content
    }
}

impl<T> Deref for MessageFrame<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.content
    }
}

impl<T> DerefMut for MessageFrame<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.content
    }
}
