use super::options::DeadLetterOptions;
use crate::library::helpers::{retry_transient, Backoff};
use crate::library::store::{StoreError, StreamEntry, StreamStore};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Name of the field referencing the stream an entry originated from
pub const FIELD_ORIGIN_STREAM: &str = "origin_stream";
/// Name of the field containing the identifier of the original entry
pub const FIELD_ORIGIN_ID: &str = "origin_id";
/// Name of the field containing the number of deliveries before giving up
pub const FIELD_DELIVERIES: &str = "deliveries";
/// Name of the field describing why the entry has been dead-lettered
pub const FIELD_REASON: &str = "reason";

/// Where and when entries are moved out of a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    /// Stream receiving dead entries
    pub stream: String,
    /// Deliveries after which a pending entry is no longer handed to the handler
    pub max_deliveries: usize,
}

impl DeadLetterPolicy {
    /// Extracts the policy from options, `None` if dead-lettering is disabled
    pub fn from_options(options: &DeadLetterOptions) -> Option<Self> {
        options
            .dead_letter_stream
            .as_ref()
            .map(|stream| DeadLetterPolicy {
                stream: stream.to_owned(),
                max_deliveries: options.max_deliveries.max(1),
            })
    }

    /// Whether an entry delivered `deliveries` times should be given up on
    pub fn is_exhausted(&self, deliveries: usize) -> bool {
        deliveries >= self.max_deliveries
    }
}

/// Moves undeliverable entries of a group into a separate stream
///
/// The copy carries the original payload along with the origin and the reason so that
/// operators may inspect and replay it. Only after the copy has been appended is the
/// original acknowledged, thus a crash in between results in a duplicate dead letter
/// instead of a lost entry.
pub struct DeadLetterRouter<S> {
    store: Arc<S>,
    origin_stream: String,
    group: String,
    payload_field: String,
    policy: DeadLetterPolicy,
}

impl<S: StreamStore> DeadLetterRouter<S> {
    /// Creates a router for entries of `group` on `origin_stream`
    pub fn new(
        store: Arc<S>,
        origin_stream: impl Into<String>,
        group: impl Into<String>,
        payload_field: impl Into<String>,
        policy: DeadLetterPolicy,
    ) -> Self {
        Self {
            store,
            origin_stream: origin_stream.into(),
            group: group.into(),
            payload_field: payload_field.into(),
            policy,
        }
    }

    /// Policy this router enforces
    pub fn policy(&self) -> &DeadLetterPolicy {
        &self.policy
    }

    /// Appends a copy of the entry to the dead-letter stream and acknowledges the original
    #[instrument(err, skip(self, entry), fields(id = %entry.id, target = %self.policy.stream))]
    pub async fn route(
        &self,
        entry: &StreamEntry,
        deliveries: usize,
        reason: &str,
    ) -> Result<(), StoreError> {
        let payload = entry.field(&self.payload_field).unwrap_or_default();
        let origin_id = entry.id.to_string();
        let deliveries = deliveries.to_string();

        let fields: [(&str, &[u8]); 5] = [
            (self.payload_field.as_str(), payload),
            (FIELD_ORIGIN_STREAM, self.origin_stream.as_bytes()),
            (FIELD_ORIGIN_ID, origin_id.as_bytes()),
            (FIELD_DELIVERIES, deliveries.as_bytes()),
            (FIELD_REASON, reason.as_bytes()),
        ];

        retry_transient(Backoff::default(), None, || {
            self.store.append(&self.policy.stream, &fields)
        })
        .await?;

        let ids = [entry.id];
        let acknowledged = retry_transient(Backoff::default(), None, || {
            self.store.ack(&self.origin_stream, &self.group, &ids)
        })
        .await?;

        if acknowledged == 0 {
            warn!("Dead-lettered entry was no longer pending");
        } else {
            warn!(reason, "Moved entry to dead-letter stream");
        }

        Ok(())
    }
}
