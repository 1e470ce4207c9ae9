use super::engine::ConsumerError;
use super::group::GroupCoordinator;
use super::handler::Handler;
use super::pipeline::ProcessingPipeline;
use super::recovery::RecoveryEngine;
use super::stats::DeliveryStats;
use crate::library::codec::MessageCodec;
use crate::library::helpers::{retry_transient, Backoff};
use crate::library::store::{ReadPosition, StoreError, StreamEntry, StreamStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

enum PollState {
    Idle,
    Polling,
    Dispatching(Vec<StreamEntry>),
    Stopped,
}

struct PeriodicRecovery<S, C> {
    engine: Arc<RecoveryEngine<S, C>>,
    interval: Duration,
}

/// Repeatedly reads new entries for a consumer and dispatches them one by one
///
/// Entries of a batch are processed sequentially in the order the store delivered them.
/// Cancellation is observed between batches only. A batch that has been read is always
/// handed to the pipeline in full as its entries are already owned by this consumer.
pub struct PollLoop<S, C> {
    store: Arc<S>,
    pipeline: Arc<ProcessingPipeline<S, C>>,
    coordinator: Arc<GroupCoordinator<S>>,
    recovery: Option<PeriodicRecovery<S, C>>,
    stream: String,
    group: String,
    consumer: String,
    batch_size: usize,
    poll_delay: Duration,
}

impl<S, C> PollLoop<S, C>
where
    S: StreamStore,
    C: MessageCodec,
{
    /// Creates a new loop reading as `consumer`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        pipeline: Arc<ProcessingPipeline<S, C>>,
        coordinator: Arc<GroupCoordinator<S>>,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        batch_size: usize,
        poll_delay: Duration,
    ) -> Self {
        Self {
            store,
            pipeline,
            coordinator,
            recovery: None,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            batch_size: batch_size.max(1),
            poll_delay,
        }
    }

    /// Re-runs the given engine whenever `interval` has passed since the last run
    pub fn with_periodic_recovery(
        mut self,
        engine: Arc<RecoveryEngine<S, C>>,
        interval: Duration,
    ) -> Self {
        self.recovery = Some(PeriodicRecovery { engine, interval });
        self
    }

    /// Polls until the token is cancelled or a store failure persists through retries.
    ///
    /// A group that vanished and can not be recreated is reported as [`ConsumerError::Group`].
    #[instrument(err, skip(self, handler, cancel), fields(stream = %self.stream, group = %self.group, consumer = %self.consumer))]
    pub async fn run<H: Handler>(
        &self,
        handler: &H,
        cancel: &CancellationToken,
    ) -> Result<DeliveryStats, ConsumerError> {
        let mut stats = DeliveryStats::default();
        let mut last_recovery = Instant::now();
        let mut state = PollState::Polling;

        debug!("Polling for new entries");

        loop {
            state = match state {
                PollState::Idle => {
                    if cancel.is_cancelled() {
                        PollState::Stopped
                    } else {
                        if let Some(recovery) = self.recovery.as_ref() {
                            if last_recovery.elapsed() >= recovery.interval {
                                let report = recovery
                                    .engine
                                    .recover(handler, cancel)
                                    .await
                                    .map_err(ConsumerError::Store)?;
                                stats.merge(&report.delivery);
                                last_recovery = Instant::now();
                            }
                        }

                        PollState::Polling
                    }
                }
                PollState::Polling => {
                    if cancel.is_cancelled() {
                        PollState::Stopped
                    } else {
                        match self.poll(cancel).await? {
                            Some(entries) if entries.is_empty() => {
                                self.wait(cancel).await;
                                PollState::Idle
                            }
                            Some(entries) => PollState::Dispatching(entries),
                            None => PollState::Stopped,
                        }
                    }
                }
                PollState::Dispatching(entries) => {
                    trace!(count = entries.len(), "Dispatching batch");

                    for entry in entries.iter() {
                        match self.pipeline.process(entry, 1, handler, cancel).await {
                            Ok(outcome) => stats.record(Some(outcome)),
                            Err(e) => {
                                warn!(error = ?e, "Failed to process entry");
                                stats.record(None);
                            }
                        }
                    }

                    PollState::Idle
                }
                PollState::Stopped => break,
            };
        }

        debug!(processed = stats.total(), "Stopped polling");

        Ok(stats)
    }

    /// Reads the next batch. Returns `None` if cancellation interrupted retrying.
    async fn poll(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<StreamEntry>>, ConsumerError> {
        let mut recreated = false;

        loop {
            let result = retry_transient(Backoff::default(), Some(cancel), || {
                self.store.read_group(
                    &self.stream,
                    &self.group,
                    &self.consumer,
                    &ReadPosition::New,
                    self.batch_size,
                )
            })
            .await;

            match result {
                Ok(entries) => return Ok(Some(entries)),
                Err(_) if cancel.is_cancelled() => return Ok(None),
                Err(StoreError::MissingGroup { .. }) if !recreated => {
                    warn!("Consumer group vanished, recreating it");
                    let recreation = self
                        .coordinator
                        .ensure_group(cancel)
                        .await
                        .map_err(ConsumerError::Group)?;

                    if recreation.is_none() {
                        return Ok(None);
                    }

                    recreated = true;
                }
                Err(e) => return Err(ConsumerError::Store(e)),
            }
        }
    }

    async fn wait(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = sleep(self.poll_delay) => {}
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::consumer::handler::HandlerResult;
    use crate::consumer::options::RecoveryScope;
    use crate::library::codec::JsonCodec;
    use crate::library::store::{GroupStart, MemoryStreamStore};
    use crate::message::MessageFrame;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    const STREAM: &str = "orders";
    const GROUP: &str = "billing";

    /// Records messages and cancels the loop once `limit` messages have been seen
    struct Recorder {
        seen: Mutex<Vec<String>>,
        limit: usize,
        cancel: CancellationToken,
    }

    impl Recorder {
        fn new(limit: usize, cancel: &CancellationToken) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                limit,
                cancel: cancel.clone(),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Handler for Recorder {
        type Content = String;

        async fn handle(&self, message: MessageFrame<String>, _: &CancellationToken) -> HandlerResult {
            let mut seen = self.seen.lock().unwrap();
            seen.push(message.into_inner());

            if seen.len() >= self.limit {
                self.cancel.cancel();
            }

            Ok(())
        }
    }

    async fn publish(store: &MemoryStreamStore, content: &str) {
        let payload = JsonCodec.encode(&MessageFrame::new("test", content)).unwrap();
        store
            .append(STREAM, &[("payload", payload.as_slice())])
            .await
            .unwrap();
    }

    fn poll_loop(store: &Arc<MemoryStreamStore>, batch_size: usize) -> PollLoop<MemoryStreamStore, JsonCodec> {
        let pipeline = Arc::new(ProcessingPipeline::new(
            store.clone(),
            JsonCodec,
            STREAM,
            GROUP,
            "payload",
        ));
        let coordinator = Arc::new(GroupCoordinator::new(
            store.clone(),
            STREAM,
            GROUP,
            GroupStart::Head,
            true,
        ));

        PollLoop::new(
            store.clone(),
            pipeline,
            coordinator,
            STREAM,
            GROUP,
            "c1",
            batch_size,
            Duration::from_millis(100),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_batches_in_order() {
        let store = Arc::new(MemoryStreamStore::new());
        for content in ["m1", "m2", "m3", "m4", "m5"] {
            publish(&store, content).await;
        }
        store
            .create_group(STREAM, GROUP, &GroupStart::Head, true)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let handler = Recorder::new(5, &cancel);

        let stats = poll_loop(&store, 2).run(&handler, &cancel).await.unwrap();

        assert_eq!(handler.seen(), vec!["m1", "m2", "m3", "m4", "m5"]);
        assert_eq!(stats.acknowledged, 5);
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_fetched_batch_after_cancellation() {
        let store = Arc::new(MemoryStreamStore::new());
        for content in ["m1", "m2", "m3"] {
            publish(&store, content).await;
        }
        store
            .create_group(STREAM, GROUP, &GroupStart::Head, true)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let handler = Recorder::new(1, &cancel);

        let stats = poll_loop(&store, 10).run(&handler, &cancel).await.unwrap();

        assert_eq!(handler.seen(), vec!["m1", "m2", "m3"]);
        assert_eq!(stats.acknowledged, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pick_up_entries_appended_while_idle() {
        let store = Arc::new(MemoryStreamStore::new());
        store
            .create_group(STREAM, GROUP, &GroupStart::Head, true)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let handler = Recorder::new(1, &cancel);
        let looped = poll_loop(&store, 10);

        let producer = async {
            sleep(Duration::from_millis(350)).await;
            publish(&store, "late").await;
        };

        let (stats, _) = tokio::join!(looped.run(&handler, &cancel), producer);

        assert_eq!(handler.seen(), vec!["late"]);
        assert_eq!(stats.unwrap().acknowledged, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recreate_missing_group() {
        let store = Arc::new(MemoryStreamStore::new());
        publish(&store, "m1").await;
        let cancel = CancellationToken::new();
        let handler = Recorder::new(1, &cancel);

        poll_loop(&store, 10).run(&handler, &cancel).await.unwrap();

        assert_eq!(handler.seen(), vec!["m1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn survive_transient_read_failures() {
        let store = Arc::new(MemoryStreamStore::new());
        publish(&store, "m1").await;
        store
            .create_group(STREAM, GROUP, &GroupStart::Head, true)
            .await
            .unwrap();
        store.inject_connection_failures(3);
        let cancel = CancellationToken::new();
        let handler = Recorder::new(1, &cancel);

        poll_loop(&store, 10).run(&handler, &cancel).await.unwrap();

        assert_eq!(handler.seen(), vec!["m1"]);
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn not_poll_once_cancelled() {
        let store = Arc::new(MemoryStreamStore::new());
        publish(&store, "m1").await;
        store
            .create_group(STREAM, GROUP, &GroupStart::Head, true)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let handler = Recorder::new(1, &cancel);

        let stats = poll_loop(&store, 10).run(&handler, &cancel).await.unwrap();

        assert_eq!(stats, DeliveryStats::default());
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 0);
        assert!(handler.seen().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recover_periodically() {
        let store = Arc::new(MemoryStreamStore::new());
        publish(&store, "abandoned").await;
        store
            .create_group(STREAM, GROUP, &GroupStart::Head, true)
            .await
            .unwrap();
        store
            .read_group(STREAM, GROUP, "crashed", &ReadPosition::New, 10)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handler = Recorder::new(1, &cancel);
        let pipeline = Arc::new(ProcessingPipeline::new(
            store.clone(),
            JsonCodec,
            STREAM,
            GROUP,
            "payload",
        ));
        let engine = Arc::new(RecoveryEngine::new(
            store.clone(),
            pipeline,
            STREAM,
            GROUP,
            "c1",
            RecoveryScope::All,
            Duration::from_secs(1),
            10,
        ));
        let looped = poll_loop(&store, 10).with_periodic_recovery(engine, Duration::from_secs(2));

        let stats = looped.run(&handler, &cancel).await.unwrap();

        assert_eq!(handler.seen(), vec!["abandoned"]);
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn report_failed_group_recreation() {
        let store = Arc::new(MemoryStreamStore::new());
        let pipeline = Arc::new(ProcessingPipeline::new(
            store.clone(),
            JsonCodec,
            STREAM,
            GROUP,
            "payload",
        ));
        let coordinator = Arc::new(GroupCoordinator::new(
            store.clone(),
            STREAM,
            GROUP,
            GroupStart::Head,
            false,
        ));
        let looped = PollLoop::new(
            store.clone(),
            pipeline,
            coordinator,
            STREAM,
            GROUP,
            "c1",
            10,
            Duration::from_millis(100),
        );
        let cancel = CancellationToken::new();
        let handler = Recorder::new(1, &cancel);

        let result = looped.run(&handler, &cancel).await;

        assert!(matches!(
            result,
            Err(ConsumerError::Group(StoreError::MissingStream(_)))
        ));
    }
}
