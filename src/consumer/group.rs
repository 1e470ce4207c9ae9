use crate::library::helpers::{retry_transient, Backoff};
use crate::library::store::{GroupCreation, GroupStart, StoreError, StreamStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Makes sure the consumer group exists before anything is read from it
pub struct GroupCoordinator<S> {
    store: Arc<S>,
    stream: String,
    group: String,
    start: GroupStart,
    create_stream: bool,
}

impl<S: StreamStore> GroupCoordinator<S> {
    /// Creates a new coordinator for `group` on `stream`
    pub fn new(
        store: Arc<S>,
        stream: impl Into<String>,
        group: impl Into<String>,
        start: GroupStart,
        create_stream: bool,
    ) -> Self {
        Self {
            store,
            stream: stream.into(),
            group: group.into(),
            start,
            create_stream,
        }
    }

    /// Creates the group unless it exists already. Safe to call any number of times.
    ///
    /// Returns `None` if the token got cancelled while waiting for the store to become reachable.
    #[instrument(err, skip(self, cancel), fields(stream = %self.stream, group = %self.group))]
    pub async fn ensure_group(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<GroupCreation>, StoreError> {
        let result = retry_transient(Backoff::default(), Some(cancel), || {
            self.store
                .create_group(&self.stream, &self.group, &self.start, self.create_stream)
        })
        .await;

        let creation = match result {
            Ok(creation) => creation,
            Err(e) if e.is_transient() && cancel.is_cancelled() => {
                debug!("Group setup interrupted by cancellation");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match creation {
            GroupCreation::Created => info!(start = ?self.start, "Created consumer group"),
            GroupCreation::AlreadyExists => debug!("Consumer group exists"),
        }

        Ok(Some(creation))
    }
}
