//! Options controlling a [`StreamConsumer`](super::StreamConsumer)
//!
//! The structs in this module allow hosts to flatten them into their
//! own options struct, providing a unified command line and environment
//! variable based configuration.

use crate::library::helpers::parse_millis;
use crate::library::store::GroupStart;
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;
use thiserror::Error;
use uuid::Uuid;

/// Default number of entries requested per poll
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Default delay between polls which returned no entries
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(100);
/// Default time an entry has to be idle before it may be reclaimed
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(5);
/// Default number of pending entries inspected per recovery round-trip
pub const DEFAULT_RECOVERY_PAGE_SIZE: usize = 100;
/// Default name of the entry field carrying the encoded message
pub const DEFAULT_PAYLOAD_FIELD: &str = "payload";

/// Stable identity of a consumer within its group
///
/// A consumer that restarts with the same identity reclaims the work it left
/// pending when it went down. Thus the name must not change across executions!
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerIdentity {
    /// Name of the consumer group
    pub group: String,
    /// Name of the consumer within the group
    pub name: String,
}

impl ConsumerIdentity {
    /// Creates a new instance from raw parts
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// Creates an identity with a random name.
    ///
    /// Entries left pending by such a consumer can only be recovered by
    /// consumers using [`RecoveryScope::All`].
    pub fn random(group: impl Into<String>) -> Self {
        Self::new(group, format!("consumer-{}", Uuid::new_v4()))
    }
}

/// Pending entries considered when recovering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryScope {
    /// Only entries owned by the recovering consumer (resuming own work after a restart)
    Own,
    /// Entries owned by any consumer of the group (failover for consumers that died)
    All,
}

impl Default for RecoveryScope {
    fn default() -> Self {
        Self::Own
    }
}

/// Error returned when parsing an unknown [`RecoveryScope`]
#[derive(Debug, Error)]
#[error("unknown recovery scope '{0}', expected 'own' or 'all'")]
pub struct InvalidRecoveryScope(String);

impl FromStr for RecoveryScope {
    type Err = InvalidRecoveryScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "own" => Ok(Self::Own),
            "all" => Ok(Self::All),
            other => Err(InvalidRecoveryScope(other.to_owned())),
        }
    }
}

/// Options for routing undeliverable entries into a separate stream
#[derive(Debug, Clone, StructOpt)]
pub struct DeadLetterOptions {
    /// Stream receiving entries that could not be processed.
    /// Omitting it disables dead-lettering and entries are retried forever.
    #[structopt(long = "dead-letter-stream", env, value_name = "key")]
    pub dead_letter_stream: Option<String>,

    /// Number of deliveries after which a pending entry is moved to the dead-letter stream
    #[structopt(long, env, default_value = "5")]
    pub max_deliveries: usize,
}

impl Default for DeadLetterOptions {
    fn default() -> Self {
        Self {
            dead_letter_stream: None,
            max_deliveries: 5,
        }
    }
}

/// Options for consuming a stream through a consumer group
#[derive(Debug, Clone, StructOpt)]
pub struct ConsumerOptions {
    /// Key of the stream to consume
    #[structopt(long, env, value_name = "key")]
    pub stream: String,

    /// Name of the consumer group
    #[structopt(long, env, value_name = "name")]
    pub group: String,

    /// Unique and stable identifier for this instance.
    /// It is used to identify and resume work after a crash
    /// or deliberate restart, thus it may not change across
    /// executions!
    #[structopt(long, env, value_name = "name")]
    pub consumer: String,

    /// Maximum number of entries requested per poll
    #[structopt(long, env, default_value = "10")]
    pub batch_size: usize,

    /// Milliseconds to wait before polling again after receiving no entries
    #[structopt(long, env, default_value = "100", parse(try_from_str = parse_millis), value_name = "ms")]
    pub poll_delay: Duration,

    /// Milliseconds an entry has to be pending without acknowledgement before it is
    /// considered abandoned and may be reclaimed. Should generously exceed the
    /// expected processing time of a single entry.
    #[structopt(long, env, default_value = "5000", parse(try_from_str = parse_millis), value_name = "ms")]
    pub idle_threshold: Duration,

    /// Whether to recover only entries abandoned by this consumer (own)
    /// or by any consumer of the group (all)
    #[structopt(long, env, default_value = "own")]
    pub recovery_scope: RecoveryScope,

    /// Number of pending entries inspected per request while recovering
    #[structopt(long, env, default_value = "100")]
    pub recovery_page_size: usize,

    /// Milliseconds between recovery runs while polling.
    /// Omitting it only recovers once on startup.
    #[structopt(long, env, parse(try_from_str = parse_millis), value_name = "ms")]
    pub recovery_interval: Option<Duration>,

    /// Where a newly created group starts consuming (head, tail or an entry id)
    #[structopt(long, env, default_value = "head")]
    pub group_start: GroupStart,

    /// Refuse to create the stream if it does not exist yet
    #[structopt(long)]
    pub no_create_stream: bool,

    /// Name of the entry field carrying the encoded message
    #[structopt(long, env, default_value = "payload")]
    pub payload_field: String,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub dead_letter: DeadLetterOptions,
}

impl ConsumerOptions {
    /// Creates options with default policies for the given stream and identity
    pub fn new(stream: impl Into<String>, identity: ConsumerIdentity) -> Self {
        Self {
            stream: stream.into(),
            group: identity.group,
            consumer: identity.name,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_delay: DEFAULT_POLL_DELAY,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            recovery_scope: RecoveryScope::default(),
            recovery_page_size: DEFAULT_RECOVERY_PAGE_SIZE,
            recovery_interval: None,
            group_start: GroupStart::default(),
            no_create_stream: false,
            payload_field: DEFAULT_PAYLOAD_FIELD.to_owned(),
            dead_letter: DeadLetterOptions::default(),
        }
    }

    /// Identity of the consumer described by these options
    pub fn identity(&self) -> ConsumerIdentity {
        ConsumerIdentity::new(self.group.as_str(), self.consumer.as_str())
    }

    /// Sets the number of entries requested per poll
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the delay between polls which returned no entries
    pub fn with_poll_delay(mut self, poll_delay: Duration) -> Self {
        self.poll_delay = poll_delay;
        self
    }

    /// Sets the time an entry has to be idle before it may be reclaimed
    pub fn with_idle_threshold(mut self, idle_threshold: Duration) -> Self {
        self.idle_threshold = idle_threshold;
        self
    }

    /// Sets which pending entries are considered when recovering
    pub fn with_recovery_scope(mut self, scope: RecoveryScope) -> Self {
        self.recovery_scope = scope;
        self
    }

    /// Sets the number of pending entries inspected per recovery request
    pub fn with_recovery_page_size(mut self, page_size: usize) -> Self {
        self.recovery_page_size = page_size;
        self
    }

    /// Enables recovery runs in between polls
    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = Some(interval);
        self
    }

    /// Sets where a newly created group starts consuming
    pub fn with_group_start(mut self, start: GroupStart) -> Self {
        self.group_start = start;
        self
    }

    /// Enables dead-lettering into the given stream after `max_deliveries`
    pub fn with_dead_letter(mut self, stream: impl Into<String>, max_deliveries: usize) -> Self {
        self.dead_letter = DeadLetterOptions {
            dead_letter_stream: Some(stream.into()),
            max_deliveries,
        };
        self
    }
}
