//! Tests against a live Redis server
//!
//! They are ignored by default, run them with `cargo test -- --ignored` and `REDIS_URL`
//! pointing to a disposable database.

use groupstream::library::store::redis::{MultiplexedRedisFactory, RedisStreamStore};
use groupstream::library::store::{
    GroupCreation, GroupStart, ReadPosition, StoreError, StreamStore,
};
use pretty_assertions::assert_eq;
use std::time::Duration;
use uuid::Uuid;

const GROUP: &str = "testing";

fn store() -> RedisStreamStore<MultiplexedRedisFactory> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost/".into());
    RedisStreamStore::new(MultiplexedRedisFactory::new(&url).unwrap())
}

fn unique_stream() -> String {
    format!("groupstream-test-{}", Uuid::new_v4())
}

#[tokio::test]
#[ignore]
async fn create_groups_idempotently() {
    let store = store();
    let stream = unique_stream();

    let first = store
        .create_group(&stream, GROUP, &GroupStart::Head, true)
        .await
        .unwrap();
    let second = store
        .create_group(&stream, GROUP, &GroupStart::Head, true)
        .await
        .unwrap();

    assert_eq!(first, GroupCreation::Created);
    assert_eq!(second, GroupCreation::AlreadyExists);
}

#[tokio::test]
#[ignore]
async fn refuse_missing_stream_without_mkstream() {
    let result = store()
        .create_group(&unique_stream(), GROUP, &GroupStart::Head, false)
        .await;

    assert!(matches!(result, Err(StoreError::MissingStream(_))));
}

#[tokio::test]
#[ignore]
async fn report_missing_groups() {
    let store = store();
    let stream = unique_stream();
    store.append(&stream, &[("payload", &b"x"[..])]).await.unwrap();

    let result = store
        .read_group(&stream, GROUP, "c1", &ReadPosition::New, 1)
        .await;

    assert!(matches!(result, Err(StoreError::MissingGroup { .. })));
}

#[tokio::test]
#[ignore]
async fn track_pending_entries_until_acknowledged() {
    let store = store();
    let stream = unique_stream();
    store
        .create_group(&stream, GROUP, &GroupStart::Head, true)
        .await
        .unwrap();
    let id = store.append(&stream, &[("payload", &b"m1"[..])]).await.unwrap();

    let read = store
        .read_group(&stream, GROUP, "c1", &ReadPosition::New, 10)
        .await
        .unwrap();
    let pending = store
        .pending_detail(&stream, GROUP, Some("c1"), None, 10)
        .await
        .unwrap();

    assert_eq!(read.len(), 1);
    assert_eq!(read[0].id, id);
    assert_eq!(read[0].field("payload"), Some(&b"m1"[..]));
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].owner, "c1");
    assert_eq!(pending[0].deliveries, 1);

    assert_eq!(store.ack(&stream, GROUP, &[id]).await.unwrap(), 1);
    assert_eq!(store.pending_summary(&stream, GROUP).await.unwrap(), 0);
}

#[tokio::test]
#[ignore]
async fn claim_only_idle_entries() {
    let store = store();
    let stream = unique_stream();
    store
        .create_group(&stream, GROUP, &GroupStart::Head, true)
        .await
        .unwrap();
    let id = store.append(&stream, &[("payload", &b"m1"[..])]).await.unwrap();
    store
        .read_group(&stream, GROUP, "c1", &ReadPosition::New, 10)
        .await
        .unwrap();

    let early = store
        .claim(&stream, GROUP, "c2", Duration::from_secs(60), &[id])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let late = store
        .claim(&stream, GROUP, "c2", Duration::from_millis(10), &[id])
        .await
        .unwrap();
    let pending = store
        .pending_detail(&stream, GROUP, None, None, 10)
        .await
        .unwrap();

    assert!(early.is_empty());
    assert_eq!(late.len(), 1);
    assert_eq!(pending[0].owner, "c2");
    assert_eq!(pending[0].deliveries, 2);
}
