use super::dead_letter::{DeadLetterPolicy, DeadLetterRouter};
use super::group::GroupCoordinator;
use super::handler::Handler;
use super::options::ConsumerOptions;
use super::pipeline::ProcessingPipeline;
use super::poll::PollLoop;
use super::recovery::{RecoveryEngine, RecoveryReport};
use super::stats::DeliveryStats;
use crate::library::codec::MessageCodec;
use crate::library::store::{GroupCreation, StoreError, StreamStore};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Failures that terminate a [`StreamConsumer`]
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The consumer group could not be created, either on startup or after it vanished
    #[error("unable to set up consumer group")]
    Group(#[source] StoreError),
    /// The store could not be reached even after retrying
    #[error("stream store failed")]
    Store(#[source] StoreError),
}

/// Summary of a consumer execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Whether the group has been created by this consumer.
    /// Absent if the consumer has been cancelled before the group could be set up.
    pub group: Option<GroupCreation>,
    /// Outcome of the recovery performed on startup
    pub recovery: RecoveryReport,
    /// Entries received while polling, including periodic recovery runs
    pub polled: DeliveryStats,
}

impl ConsumerReport {
    /// Combined tally of the startup recovery and the polling phase
    pub fn delivery(&self) -> DeliveryStats {
        let mut total = self.recovery.delivery;
        total.merge(&self.polled);
        total
    }
}

/// Consumes a stream as a member of a consumer group
///
/// Running a consumer happens in three phases:
///
/// 1. The consumer group is created if it does not exist yet
/// 2. Entries which have been left pending, either by this consumer in a previous life or
///    by other consumers depending on the [`RecoveryScope`](super::RecoveryScope), are reclaimed
///    and processed
/// 3. New entries are polled and processed until the cancellation token fires
///
/// Every entry is handed to the [`Handler`] at least once. It is acknowledged only after the
/// handler returned successfully, thus entries may be delivered more than once when a consumer
/// crashes between processing and acknowledging.
///
/// Multiple consumers may share a store, each of them processes entries sequentially.
pub struct StreamConsumer<S, C> {
    options: ConsumerOptions,
    coordinator: Arc<GroupCoordinator<S>>,
    recovery: Arc<RecoveryEngine<S, C>>,
    poll: PollLoop<S, C>,
}

impl<S, C> StreamConsumer<S, C>
where
    S: StreamStore,
    C: MessageCodec,
{
    /// Wires up a new consumer. No requests are made to the store until it is [run](Self::run).
    pub fn new(store: Arc<S>, codec: C, options: ConsumerOptions) -> Self {
        let mut pipeline = ProcessingPipeline::new(
            store.clone(),
            codec,
            options.stream.as_str(),
            options.group.as_str(),
            options.payload_field.as_str(),
        );

        if let Some(policy) = DeadLetterPolicy::from_options(&options.dead_letter) {
            let router = DeadLetterRouter::new(
                store.clone(),
                options.stream.as_str(),
                options.group.as_str(),
                options.payload_field.as_str(),
                policy,
            );
            pipeline = pipeline.with_dead_letter(router);
        }

        let pipeline = Arc::new(pipeline);

        let coordinator = Arc::new(GroupCoordinator::new(
            store.clone(),
            options.stream.as_str(),
            options.group.as_str(),
            options.group_start.clone(),
            !options.no_create_stream,
        ));

        let recovery = Arc::new(RecoveryEngine::new(
            store.clone(),
            pipeline.clone(),
            options.stream.as_str(),
            options.group.as_str(),
            options.consumer.as_str(),
            options.recovery_scope,
            options.idle_threshold,
            options.recovery_page_size,
        ));

        let mut poll = PollLoop::new(
            store,
            pipeline,
            coordinator.clone(),
            options.stream.as_str(),
            options.group.as_str(),
            options.consumer.as_str(),
            options.batch_size,
            options.poll_delay,
        );

        if let Some(interval) = options.recovery_interval {
            poll = poll.with_periodic_recovery(recovery.clone(), interval);
        }

        Self {
            options,
            coordinator,
            recovery,
            poll,
        }
    }

    /// Options the consumer has been created with
    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    /// Runs the consumer until the token is cancelled.
    ///
    /// Failures of individual entries never end the execution. Only a consumer group that can
    /// not be created or a store that stays unreachable after retrying are reported as errors.
    #[instrument(err, skip(self, handler, cancel), fields(stream = %self.options.stream, group = %self.options.group, consumer = %self.options.consumer))]
    pub async fn run<H: Handler>(
        &self,
        handler: &H,
        cancel: &CancellationToken,
    ) -> Result<ConsumerReport, ConsumerError> {
        let group = self
            .coordinator
            .ensure_group(cancel)
            .await
            .map_err(ConsumerError::Group)?;

        if group.is_none() {
            info!("Consumer cancelled during group setup");

            return Ok(ConsumerReport {
                group,
                recovery: RecoveryReport {
                    cancelled: true,
                    ..Default::default()
                },
                polled: DeliveryStats::default(),
            });
        }

        let recovery = self
            .recovery
            .recover(handler, cancel)
            .await
            .map_err(ConsumerError::Store)?;

        let polled = self.poll.run(handler, cancel).await?;

        let report = ConsumerReport {
            group,
            recovery,
            polled,
        };

        info!(processed = report.delivery().total(), "Consumer stopped");

        Ok(report)
    }
}
