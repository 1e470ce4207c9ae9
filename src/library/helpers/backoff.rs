//! Exponential backoff implementations

use std::{iter::Iterator, time::Duration};

/// Exponential backoff iterator
///
/// This struct implements the iterator trait and returns monotonically increasing values until a specified limit of iterations, specified by the `limit` field, is reached.
/// Each element in the Iterator is the previous element multiplied by the `multiplier` property.
#[derive(Debug, Clone)]
pub struct Backoff {
    retries: u32,
    limit: u32,
    multiplier: u32,
    current: Duration,
}

impl Backoff {
    /// Creates a new backoff which starts at `initial` and yields at most `limit` delays
    pub fn new(initial: Duration, limit: u32) -> Self {
        Self {
            retries: 0,
            limit,
            multiplier: 2,
            // The first call to `next` already multiplies
            current: initial / 2,
        }
    }
}

impl Default for Backoff {
    /// Starts at 50ms and gives up after eight retries (~12.75s of accumulated delay)
    fn default() -> Self {
        Self::new(Duration::from_millis(50), 8)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        self.retries += 1;

        if self.retries > self.limit {
            None
        } else {
            self.current *= self.multiplier;
            Some(self.current)
        }
    }
}
