//! Various small helper functions

mod backoff;
mod retry;

pub use backoff::*;
pub use retry::*;

use std::num::ParseIntError;
use std::time::Duration;

/// Parses a Duration from a string containing milliseconds.
/// Useful for command line parsing
pub fn parse_millis(src: &str) -> Result<Duration, ParseIntError> {
    let millis = src.parse::<u64>()?;
    Ok(Duration::from_millis(millis))
}
