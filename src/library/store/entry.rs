use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Broker assigned identifier of a stream entry
///
/// Identifiers consist of a millisecond timestamp and a sequence number (rendered as `<ms>-<seq>`)
/// and are strictly increasing within a stream. Their ordering equals the order of appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    millis: u64,
    sequence: u64,
}

impl EntryId {
    /// Smallest possible identifier (`0-0`), never assigned to an actual entry
    pub const MIN: EntryId = EntryId {
        millis: 0,
        sequence: 0,
    };

    /// Creates a new identifier from raw parts
    pub fn new(millis: u64, sequence: u64) -> Self {
        Self { millis, sequence }
    }

    /// Timestamp part of the identifier
    pub fn millis(&self) -> u64 {
        self.millis
    }

    /// Sequence number of the entry within its millisecond
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Smallest identifier that is strictly greater than `self`
    pub fn next(&self) -> Self {
        match self.sequence.checked_add(1) {
            Some(sequence) => Self::new(self.millis, sequence),
            None => Self::new(self.millis.saturating_add(1), 0),
        }
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.sequence)
    }
}

/// Error returned when parsing an invalid [`EntryId`]
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid stream entry id '{0}'")]
pub struct InvalidEntryId(String);

impl FromStr for EntryId {
    type Err = InvalidEntryId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidEntryId(s.to_owned());
        let mut parts = s.splitn(2, '-');

        let millis = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;

        // The sequence part may be omitted, in which case it defaults to zero
        let sequence = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };

        Ok(Self::new(millis, sequence))
    }
}

/// Immutable entry read from a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Identifier assigned by the store
    pub id: EntryId,
    /// Raw field/value pairs of the entry
    pub fields: HashMap<String, Vec<u8>>,
}

impl StreamEntry {
    /// Creates a new instance from raw parts
    pub fn new(id: EntryId, fields: HashMap<String, Vec<u8>>) -> Self {
        Self { id, fields }
    }

    /// Value of a field if present
    pub fn field(&self, name: &str) -> Option<&[u8]> {
        self.fields.get(name).map(Vec::as_slice)
    }
}

/// Entry which has been delivered to a consumer but not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Identifier of the delivered entry
    pub id: EntryId,
    /// Consumer which currently owns the entry
    pub owner: String,
    /// Time since the entry has last been delivered to its owner
    pub idle: Duration,
    /// Number of times the entry has been delivered (initial read plus claims)
    pub deliveries: usize,
}

/// Position from which a consumer reads within its group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPosition {
    /// Entries that have never been delivered to any consumer of the group (`>`)
    New,
    /// Entries pending for the reading consumer with an id greater than the given one
    After(EntryId),
}

impl Display for ReadPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, ">"),
            Self::After(id) => write!(f, "{}", id),
        }
    }
}

/// Location from which a newly created consumer group starts consuming
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupStart {
    /// Start of the stream, every retained entry will be delivered
    Head,
    /// End of the stream, only entries appended after the group has been created are delivered
    Tail,
    /// Every entry with an id greater than the given one is delivered
    At(EntryId),
}

impl Default for GroupStart {
    fn default() -> Self {
        Self::Head
    }
}

impl FromStr for GroupStart {
    type Err = InvalidEntryId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "head" | "0" => Ok(Self::Head),
            "tail" | "$" => Ok(Self::Tail),
            id => id.parse().map(Self::At),
        }
    }
}

/// Result of an idempotent group creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCreation {
    /// Group did not exist and has been created
    Created,
    /// Group existed beforehand and has been left untouched
    AlreadyExists,
}
