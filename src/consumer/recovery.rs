use super::handler::Handler;
use super::options::RecoveryScope;
use super::pipeline::ProcessingPipeline;
use super::stats::DeliveryStats;
use crate::library::codec::MessageCodec;
use crate::library::helpers::{retry_transient, Backoff};
use crate::library::store::{EntryId, PendingEntry, StoreError, StreamStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Summary of a single recovery run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries pending within the group when the run started
    pub pending: usize,
    /// Pending entries that have been inspected
    pub inspected: usize,
    /// Entries whose ownership has been transferred to this consumer
    pub claimed: usize,
    /// What happened to the claimed entries
    pub delivery: DeliveryStats,
    /// Whether the run has been cut short by cancellation
    pub cancelled: bool,
}

/// Reclaims entries which have been delivered but never acknowledged
///
/// Pending entries are listed page by page. Those idle for at least the idle threshold are
/// claimed in one request per page and processed in the order the store returns them.
/// Entries claimed concurrently by another consumer are absent from the reply and thus skipped.
pub struct RecoveryEngine<S, C> {
    store: Arc<S>,
    pipeline: Arc<ProcessingPipeline<S, C>>,
    stream: String,
    group: String,
    consumer: String,
    scope: RecoveryScope,
    idle_threshold: Duration,
    page_size: usize,
}

impl<S, C> RecoveryEngine<S, C>
where
    S: StreamStore,
    C: MessageCodec,
{
    /// Creates a new engine claiming entries on behalf of `consumer`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        pipeline: Arc<ProcessingPipeline<S, C>>,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        scope: RecoveryScope,
        idle_threshold: Duration,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            pipeline,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            scope,
            idle_threshold,
            page_size: page_size.max(1),
        }
    }

    /// Claims and processes abandoned entries.
    ///
    /// Failures of individual entries are counted in the report, only store failures
    /// which persist through retries are returned as errors.
    #[instrument(err, skip(self, handler, cancel), fields(stream = %self.stream, group = %self.group, consumer = %self.consumer))]
    pub async fn recover<H: Handler>(
        &self,
        handler: &H,
        cancel: &CancellationToken,
    ) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport::default();

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let summary = retry_transient(Backoff::default(), Some(cancel), || {
            self.store.pending_summary(&self.stream, &self.group)
        })
        .await;

        report.pending = match interrupted(summary, cancel)? {
            Some(pending) => pending,
            None => {
                report.cancelled = true;
                return Ok(report);
            }
        };

        if report.pending == 0 {
            debug!("No pending entries to recover");
            return Ok(report);
        }

        let owner = match self.scope {
            RecoveryScope::Own => Some(self.consumer.as_str()),
            RecoveryScope::All => None,
        };

        let mut start: Option<EntryId> = None;

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let page = retry_transient(Backoff::default(), Some(cancel), || {
                self.store.pending_detail(
                    &self.stream,
                    &self.group,
                    owner,
                    start.as_ref(),
                    self.page_size,
                )
            })
            .await;

            let page = match interrupted(page, cancel)? {
                Some(page) => page,
                None => {
                    report.cancelled = true;
                    break;
                }
            };

            let last = match page.last() {
                Some(last) => last.id,
                None => break,
            };

            report.inspected += page.len();

            if !self.recover_page(&page, handler, cancel, &mut report).await? {
                report.cancelled = true;
                break;
            }

            if page.len() < self.page_size {
                break;
            }

            start = Some(last.next());
        }

        info!(
            claimed = report.claimed,
            acknowledged = report.delivery.acknowledged,
            dead_lettered = report.delivery.dead_lettered,
            "Recovery finished"
        );

        Ok(report)
    }

    /// Claims the eligible entries of a page and processes them.
    /// Returns `false` if processing has been interrupted by cancellation.
    async fn recover_page<H: Handler>(
        &self,
        page: &[PendingEntry],
        handler: &H,
        cancel: &CancellationToken,
        report: &mut RecoveryReport,
    ) -> Result<bool, StoreError> {
        let previous_deliveries: HashMap<EntryId, usize> = page
            .iter()
            .filter(|pending| pending.idle >= self.idle_threshold)
            .map(|pending| (pending.id, pending.deliveries))
            .collect();

        if previous_deliveries.is_empty() {
            return Ok(true);
        }

        let mut ids: Vec<EntryId> = previous_deliveries.keys().copied().collect();
        ids.sort();

        let claimed = retry_transient(Backoff::default(), Some(cancel), || {
            self.store.claim(
                &self.stream,
                &self.group,
                &self.consumer,
                self.idle_threshold,
                &ids,
            )
        })
        .await;

        let claimed = match interrupted(claimed, cancel)? {
            Some(claimed) => claimed,
            None => return Ok(false),
        };

        debug!(eligible = ids.len(), claimed = claimed.len(), "Claimed idle entries");
        report.claimed += claimed.len();

        let policy = self.pipeline.dead_letter().map(|router| router.policy());

        for entry in claimed.iter() {
            if cancel.is_cancelled() {
                return Ok(false);
            }

            let previous = previous_deliveries.get(&entry.id).copied().unwrap_or_default();
            let deliveries = previous + 1;

            let result = match policy {
                Some(policy) if policy.is_exhausted(previous) => {
                    self.pipeline.expire(entry, previous).await
                }
                _ => {
                    self.pipeline
                        .process(entry, deliveries, handler, cancel)
                        .await
                }
            };

            match result {
                Ok(outcome) => report.delivery.record(Some(outcome)),
                Err(e) => {
                    warn!(error = ?e, "Failed to process recovered entry");
                    report.delivery.record(None);
                }
            }
        }

        Ok(true)
    }
}

/// Turns a transient failure caused by cancelled retrying into `None`
fn interrupted<T>(
    result: Result<T, StoreError>,
    cancel: &CancellationToken,
) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_transient() && cancel.is_cancelled() => Ok(None),
        Err(e) => Err(e),
    }
}

impl RecoveryReport {
    /// Whether every claimed entry has been settled, i.e. is no longer pending for this consumer
    pub fn is_settled(&self) -> bool {
        self.delivery.acknowledged + self.delivery.dropped + self.delivery.dead_lettered
            == self.claimed
    }
}
