use super::super::{
    EntryId, GroupCreation, GroupStart, InvalidEntryId, PendingEntry, ReadPosition, StoreError,
    StreamEntry, StreamStore,
};
use super::{
    RedisFactory, ERROR_CODE_BUSY_GROUP, ERROR_CODE_NO_GROUP, STREAM_ID_HEAD, STREAM_ID_NEW,
    STREAM_ID_TAIL, STREAM_RANGE_MAX, STREAM_RANGE_MIN,
};
use async_trait::async_trait;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingReply, StreamReadOptions,
    StreamReadReply,
};
use redis::{from_redis_value, AsyncCommands, RedisError, RedisResult, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{instrument, warn};

/// Stream store implementation using [Redis Streams](https://redis.io/topics/streams-intro)
///
/// | Operation          | Command                                        |
/// |--------------------|------------------------------------------------|
/// | `append`           | `XADD key * field value ...`                   |
/// | `create_group`     | `XGROUP CREATE key group <start> [MKSTREAM]`   |
/// | `read_group`       | `XREADGROUP GROUP group consumer COUNT n ...`  |
/// | `pending_summary`  | `XPENDING key group`                           |
/// | `pending_detail`   | `XPENDING key group start + n [consumer]`      |
/// | `claim`            | `XCLAIM key group consumer min-idle id ...`    |
/// | `ack`              | `XACK key group id ...`                        |
pub struct RedisStreamStore<F: RedisFactory> {
    factory: F,
}

impl<F: RedisFactory> RedisStreamStore<F> {
    /// Creates a new instance with a given [`RedisFactory`]
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F> RedisStreamStore<F>
where
    F: RedisFactory + Send + Sync,
{
    /// Maps a redis error into the store error taxonomy and drops the
    /// shared connection if it is no longer usable
    async fn classify(&self, error: RedisError, stream: &str, group: Option<&str>) -> StoreError {
        if error.is_io_error()
            || error.is_timeout()
            || error.is_connection_dropped()
            || error.is_connection_refusal()
        {
            warn!(?error, "Redis connection encountered error");
            self.factory.invalidate().await;
            return StoreError::Connection(Box::new(error));
        }

        match (error.code(), group) {
            (Some(ERROR_CODE_NO_GROUP), Some(group)) => StoreError::MissingGroup {
                stream: stream.to_owned(),
                group: group.to_owned(),
            },
            _ => StoreError::Command(Box::new(error)),
        }
    }

    async fn finish<T>(
        &self,
        result: RedisResult<T>,
        stream: &str,
        group: Option<&str>,
    ) -> Result<T, StoreError> {
        match result {
            Ok(value) => Ok(value),
            Err(error) => Err(self.classify(error, stream, group).await),
        }
    }
}

#[async_trait]
impl<F> StreamStore for RedisStreamStore<F>
where
    F: RedisFactory + Send + Sync,
{
    #[instrument(level = "trace", err, skip(self, fields))]
    async fn append(&self, stream: &str, fields: &[(&str, &[u8])]) -> Result<EntryId, StoreError> {
        let mut con = self.factory.connection().await?;
        let result: RedisResult<String> = con.xadd(stream, STREAM_ID_NEW, fields).await;
        let id = self.finish(result, stream, None).await?;

        parse_entry_id(&id)
    }

    #[instrument(level = "trace", err, skip(self))]
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &GroupStart,
        create_stream: bool,
    ) -> Result<GroupCreation, StoreError> {
        let start_id = match start {
            GroupStart::Head => STREAM_ID_HEAD.to_owned(),
            GroupStart::Tail => STREAM_ID_TAIL.to_owned(),
            GroupStart::At(id) => id.to_string(),
        };

        let mut con = self.factory.connection().await?;
        let result: RedisResult<()> = if create_stream {
            con.xgroup_create_mkstream(stream, group, start_id).await
        } else {
            con.xgroup_create(stream, group, start_id).await
        };

        match result {
            Ok(()) => Ok(GroupCreation::Created),
            Err(e) if e.code() == Some(ERROR_CODE_BUSY_GROUP) => Ok(GroupCreation::AlreadyExists),
            Err(e) if e.to_string().contains("requires the key to exist") => {
                Err(StoreError::MissingStream(stream.to_owned()))
            }
            Err(e) => Err(self.classify(e, stream, Some(group)).await),
        }
    }

    #[instrument(level = "trace", err, skip(self))]
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        position: &ReadPosition,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);
        let position = position.to_string();

        let mut con = self.factory.connection().await?;
        let result: RedisResult<Option<StreamReadReply>> = con
            .xread_options(&[stream], &[position.as_str()], options)
            .await;

        let reply = match self.finish(result, stream, Some(group)).await? {
            Some(reply) => reply,
            None => return Ok(Vec::new()),
        };

        let mut entries = Vec::new();

        for key in reply.keys {
            if key.key != stream {
                return Err(StoreError::Protocol(format!(
                    "received entries of stream '{}' while reading '{}'",
                    key.key, stream
                )));
            }

            for id in key.ids {
                entries.push(convert_entry(id)?);
            }
        }

        Ok(entries)
    }

    #[instrument(level = "trace", err, skip(self))]
    async fn pending_summary(&self, stream: &str, group: &str) -> Result<usize, StoreError> {
        let mut con = self.factory.connection().await?;
        let result: RedisResult<StreamPendingReply> = con.xpending(stream, group).await;
        let reply = self.finish(result, stream, Some(group)).await?;

        Ok(reply.count())
    }

    #[instrument(level = "trace", err, skip(self))]
    async fn pending_detail(
        &self,
        stream: &str,
        group: &str,
        consumer: Option<&str>,
        start: Option<&EntryId>,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StoreError> {
        let start = start
            .map(ToString::to_string)
            .unwrap_or_else(|| STREAM_RANGE_MIN.to_owned());

        let mut con = self.factory.connection().await?;
        let result: RedisResult<StreamPendingCountReply> = match consumer {
            Some(consumer) => {
                con.xpending_consumer_count(stream, group, start, STREAM_RANGE_MAX, count, consumer)
                    .await
            }
            None => {
                con.xpending_count(stream, group, start, STREAM_RANGE_MAX, count)
                    .await
            }
        };

        let reply = self.finish(result, stream, Some(group)).await?;

        reply
            .ids
            .into_iter()
            .map(|pending| {
                Ok(PendingEntry {
                    id: parse_entry_id(&pending.id)?,
                    owner: pending.consumer,
                    idle: Duration::from_millis(pending.last_delivered_ms as u64),
                    deliveries: pending.times_delivered,
                })
            })
            .collect()
    }

    #[instrument(level = "trace", err, skip(self))]
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[EntryId],
    ) -> Result<Vec<StreamEntry>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let min_idle_ms = min_idle.as_millis() as u64;

        let mut con = self.factory.connection().await?;
        let result: RedisResult<StreamClaimReply> =
            con.xclaim(stream, group, consumer, min_idle_ms, ids.as_slice()).await;
        let reply = self.finish(result, stream, Some(group)).await?;

        reply.ids.into_iter().map(convert_entry).collect()
    }

    #[instrument(level = "trace", err, skip(self))]
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();

        let mut con = self.factory.connection().await?;
        let result: RedisResult<usize> = con.xack(stream, group, ids.as_slice()).await;

        self.finish(result, stream, Some(group)).await
    }
}

fn parse_entry_id(id: &str) -> Result<EntryId, StoreError> {
    id.parse()
        .map_err(|e: InvalidEntryId| StoreError::Protocol(e.to_string()))
}

fn convert_entry(entry: StreamId) -> Result<StreamEntry, StoreError> {
    let id = parse_entry_id(&entry.id)?;
    let mut fields = HashMap::with_capacity(entry.map.len());

    for (name, value) in entry.map {
        if matches!(value, Value::Nil) {
            continue;
        }

        let value: Vec<u8> =
            from_redis_value(&value).map_err(|e| StoreError::Protocol(e.to_string()))?;
        fields.insert(name, value);
    }

    Ok(StreamEntry::new(id, fields))
}
