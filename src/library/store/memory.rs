use super::{
    EntryId, GroupCreation, GroupStart, PendingEntry, ReadPosition, StoreError, StreamEntry,
    StreamStore,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::trace;

type Fields = HashMap<String, Vec<u8>>;

struct PendingState {
    owner: String,
    delivered_at: Instant,
    deliveries: usize,
}

#[derive(Default)]
struct GroupState {
    cursor: EntryId,
    pending: BTreeMap<EntryId, PendingState>,
}

#[derive(Default)]
struct StreamState {
    entries: BTreeMap<EntryId, Fields>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn next_id(&mut self) -> EntryId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let id = if millis > self.last_id.millis() {
            EntryId::new(millis, 0)
        } else {
            self.last_id.next()
        };

        self.last_id = id;
        id
    }
}

#[derive(Default)]
struct MemoryState {
    streams: HashMap<String, StreamState>,
    injected_failures: usize,
}

impl MemoryState {
    fn check_connection(&mut self) -> Result<(), StoreError> {
        if self.injected_failures > 0 {
            self.injected_failures -= 1;
            return Err(StoreError::Connection("injected connection failure".into()));
        }

        Ok(())
    }

    fn group(&mut self, stream: &str, group: &str) -> Result<&mut GroupState, StoreError> {
        self.stream_and_group(stream, group).map(|(_, g)| g)
    }

    fn stream_and_group(
        &mut self,
        stream: &str,
        group: &str,
    ) -> Result<(&BTreeMap<EntryId, Fields>, &mut GroupState), StoreError> {
        let missing = || StoreError::MissingGroup {
            stream: stream.to_owned(),
            group: group.to_owned(),
        };

        let state = self.streams.get_mut(stream).ok_or_else(missing)?;
        let group_state = state.groups.get_mut(group).ok_or_else(missing)?;

        Ok((&state.entries, group_state))
    }
}

/// [`StreamStore`] implementation keeping all streams in process memory
///
/// It mirrors the semantics of Redis Streams closely enough to exercise consumers without
/// a running server: entries are delivered at most once per group through [`ReadPosition::New`],
/// every delivery is tracked in a pending entries list with its owner, idle time and delivery
/// count, and claiming respects the minimum idle time. Idle times are measured with the tokio
/// clock so that tests may pause and advance time.
///
/// Cloning the store yields another handle to the same data.
#[derive(Clone, Default)]
pub struct MemoryStreamStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStreamStore {
    /// Creates a new, empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` operations fail with a transient [`StoreError::Connection`]
    pub fn inject_connection_failures(&self, count: usize) {
        self.state().injected_failures += count;
    }

    /// Number of entries currently retained in a stream
    pub fn len(&self, stream: &str) -> usize {
        self.state()
            .streams
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or_default()
    }

    /// Whether a stream is missing or contains no entries
    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    /// All entries currently retained in a stream, in id order
    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.state()
            .streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .map(|(id, fields)| StreamEntry::new(*id, fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes entries from a stream without touching any pending entries list,
    /// similar to what trimming does on a real broker
    pub fn delete(&self, stream: &str, ids: &[EntryId]) -> usize {
        let mut state = self.state();

        match state.streams.get_mut(stream) {
            Some(s) => ids
                .iter()
                .filter(|id| s.entries.remove(*id).is_some())
                .count(),
            None => 0,
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // Operations validate before mutating, a poisoned state is still consistent
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn append(&self, stream: &str, fields: &[(&str, &[u8])]) -> Result<EntryId, StoreError> {
        let mut state = self.state();
        state.check_connection()?;

        let stream_state = state.streams.entry(stream.to_owned()).or_default();
        let id = stream_state.next_id();
        let fields = fields
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.to_vec()))
            .collect();

        stream_state.entries.insert(id, fields);
        trace!(stream, %id, "Appended entry");

        Ok(id)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &GroupStart,
        create_stream: bool,
    ) -> Result<GroupCreation, StoreError> {
        let mut state = self.state();
        state.check_connection()?;

        if !state.streams.contains_key(stream) {
            if !create_stream {
                return Err(StoreError::MissingStream(stream.to_owned()));
            }

            state.streams.insert(stream.to_owned(), StreamState::default());
        }

        let stream_state = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| StoreError::MissingStream(stream.to_owned()))?;

        if stream_state.groups.contains_key(group) {
            return Ok(GroupCreation::AlreadyExists);
        }

        let cursor = match start {
            GroupStart::Head => EntryId::MIN,
            GroupStart::Tail => stream_state.last_id,
            GroupStart::At(id) => *id,
        };

        stream_state.groups.insert(
            group.to_owned(),
            GroupState {
                cursor,
                pending: BTreeMap::new(),
            },
        );

        Ok(GroupCreation::Created)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        position: &ReadPosition,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut state = self.state();
        state.check_connection()?;

        let (entries, group_state) = state.stream_and_group(stream, group)?;
        let now = Instant::now();

        let delivered = match position {
            ReadPosition::New => {
                let delivered: Vec<StreamEntry> = entries
                    .range(group_state.cursor.next()..)
                    .take(count)
                    .map(|(id, fields)| StreamEntry::new(*id, fields.clone()))
                    .collect();

                for entry in delivered.iter() {
                    group_state.pending.insert(
                        entry.id,
                        PendingState {
                            owner: consumer.to_owned(),
                            delivered_at: now,
                            deliveries: 1,
                        },
                    );
                }

                if let Some(last) = delivered.last() {
                    group_state.cursor = last.id;
                }

                delivered
            }
            ReadPosition::After(after) => {
                let mut delivered = Vec::new();

                for (id, pending) in group_state.pending.range_mut(after.next()..) {
                    if delivered.len() >= count {
                        break;
                    }

                    if pending.owner != consumer {
                        continue;
                    }

                    if let Some(fields) = entries.get(id) {
                        pending.delivered_at = now;
                        pending.deliveries += 1;
                        delivered.push(StreamEntry::new(*id, fields.clone()));
                    }
                }

                delivered
            }
        };

        Ok(delivered)
    }

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<usize, StoreError> {
        let mut state = self.state();
        state.check_connection()?;

        Ok(state.group(stream, group)?.pending.len())
    }

    async fn pending_detail(
        &self,
        stream: &str,
        group: &str,
        consumer: Option<&str>,
        start: Option<&EntryId>,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StoreError> {
        let mut state = self.state();
        state.check_connection()?;

        let group_state = state.group(stream, group)?;
        let start = start.copied().unwrap_or(EntryId::MIN);
        let now = Instant::now();

        let pending = group_state
            .pending
            .range(start..)
            .filter(|(_, p)| consumer.map(|c| c == p.owner).unwrap_or(true))
            .take(count)
            .map(|(id, p)| PendingEntry {
                id: *id,
                owner: p.owner.clone(),
                idle: now.saturating_duration_since(p.delivered_at),
                deliveries: p.deliveries,
            })
            .collect();

        Ok(pending)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut state = self.state();
        state.check_connection()?;

        let (entries, group_state) = state.stream_and_group(stream, group)?;
        let now = Instant::now();
        let mut claimed = Vec::with_capacity(ids.len());

        for id in ids {
            let eligible = match group_state.pending.get(id) {
                Some(pending) => now.saturating_duration_since(pending.delivered_at) >= min_idle,
                None => false,
            };

            if !eligible {
                continue;
            }

            // Entries which have been removed from the stream can never be processed
            if !entries.contains_key(id) {
                group_state.pending.remove(id);
                continue;
            }

            if let Some(pending) = group_state.pending.get_mut(id) {
                pending.owner = consumer.to_owned();
                pending.delivered_at = now;
                pending.deliveries += 1;
            }

            if let Some(fields) = entries.get(id) {
                claimed.push(StreamEntry::new(*id, fields.clone()));
            }
        }

        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize, StoreError> {
        let mut state = self.state();
        state.check_connection()?;

        let group_state = match state.group(stream, group) {
            Ok(group_state) => group_state,
            // Acknowledging on an unknown group is a no-op, just like it is with Redis
            Err(_) => return Ok(0),
        };

        Ok(ids
            .iter()
            .filter(|id| group_state.pending.remove(*id).is_some())
            .count())
    }
}
