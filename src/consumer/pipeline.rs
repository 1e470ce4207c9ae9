use super::dead_letter::DeadLetterRouter;
use super::handler::{Handler, HandlerError};
use crate::library::codec::{CodecError, MessageCodec};
use crate::library::helpers::{retry_transient, Backoff};
use crate::library::store::{EntryId, StoreError, StreamEntry, StreamStore};
use crate::message::MessageFrame;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

/// What happened to an entry that went through the [`ProcessingPipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Handler succeeded and the entry has been acknowledged
    Acknowledged,
    /// Entry remains in the pending entries list and will be reclaimed eventually
    LeftPending,
    /// Entry carried no payload and has been acknowledged without processing
    Dropped,
    /// Entry has been moved to the dead-letter stream
    DeadLettered,
}

/// Per-entry failures of the [`ProcessingPipeline`]
///
/// None of them are fatal to the consumer, the affected entry simply stays pending.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Payload could not be decoded into the content expected by the handler
    #[error("unable to decode payload of entry {id}")]
    Decode {
        /// Entry carrying the offending payload
        id: EntryId,
        /// Underlying codec failure
        #[source]
        source: CodecError,
    },
    /// Entry could not be acknowledged or moved to the dead-letter stream
    #[error("unable to settle entry {id}")]
    Store {
        /// Affected entry
        id: EntryId,
        /// Underlying store failure
        #[source]
        source: StoreError,
    },
}

/// Decodes entries, hands them to a [`Handler`] and settles them according to its verdict
pub struct ProcessingPipeline<S, C> {
    store: Arc<S>,
    codec: C,
    stream: String,
    group: String,
    payload_field: String,
    dead_letter: Option<DeadLetterRouter<S>>,
}

impl<S, C> ProcessingPipeline<S, C>
where
    S: StreamStore,
    C: MessageCodec,
{
    /// Creates a new pipeline for entries of `group` on `stream`
    pub fn new(
        store: Arc<S>,
        codec: C,
        stream: impl Into<String>,
        group: impl Into<String>,
        payload_field: impl Into<String>,
    ) -> Self {
        Self {
            store,
            codec,
            stream: stream.into(),
            group: group.into(),
            payload_field: payload_field.into(),
            dead_letter: None,
        }
    }

    /// Routes rejected entries through the given router
    pub fn with_dead_letter(mut self, router: DeadLetterRouter<S>) -> Self {
        self.dead_letter = Some(router);
        self
    }

    /// Router used for rejected or exhausted entries, if any
    pub fn dead_letter(&self) -> Option<&DeadLetterRouter<S>> {
        self.dead_letter.as_ref()
    }

    /// Processes a single entry that has been delivered `deliveries` times so far
    #[instrument(skip(self, entry, handler, cancel), fields(id = %entry.id))]
    pub async fn process<H>(
        &self,
        entry: &StreamEntry,
        deliveries: usize,
        handler: &H,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, PipelineError>
    where
        H: Handler,
    {
        let payload = match entry.field(&self.payload_field) {
            Some(payload) => payload,
            None => {
                warn!(field = %self.payload_field, "Dropping entry without payload");
                self.acknowledge(entry.id).await?;
                return Ok(ProcessOutcome::Dropped);
            }
        };

        let message: MessageFrame<H::Content> =
            self.codec
                .decode(payload)
                .map_err(|source| PipelineError::Decode {
                    id: entry.id,
                    source,
                })?;

        trace!(producer = message.producer(), "Handing message to handler");

        match handler.handle(message, cancel).await {
            Ok(()) => match self.acknowledge(entry.id).await {
                Ok(()) => Ok(ProcessOutcome::Acknowledged),
                Err(e) => {
                    warn!(error = ?e, "Processed entry could not be acknowledged");
                    Ok(ProcessOutcome::LeftPending)
                }
            },
            Err(HandlerError::Retry(e)) => {
                debug!(error = %e, "Handler requested retry");
                Ok(ProcessOutcome::LeftPending)
            }
            Err(HandlerError::Reject(e)) => match self.dead_letter.as_ref() {
                Some(router) => {
                    let reason = e.to_string();
                    router
                        .route(entry, deliveries, &reason)
                        .await
                        .map_err(|source| PipelineError::Store {
                            id: entry.id,
                            source,
                        })?;
                    Ok(ProcessOutcome::DeadLettered)
                }
                None => {
                    error!(error = %e, "Handler rejected entry, leaving it pending");
                    Ok(ProcessOutcome::LeftPending)
                }
            },
        }
    }

    /// Moves an entry that has been delivered too often to the dead-letter stream
    /// without handing it to the handler
    pub async fn expire(
        &self,
        entry: &StreamEntry,
        deliveries: usize,
    ) -> Result<ProcessOutcome, PipelineError> {
        let router = match self.dead_letter.as_ref() {
            Some(router) => router,
            None => return Ok(ProcessOutcome::LeftPending),
        };

        let reason = format!("exceeded {} deliveries", router.policy().max_deliveries);
        router
            .route(entry, deliveries, &reason)
            .await
            .map_err(|source| PipelineError::Store {
                id: entry.id,
                source,
            })?;

        Ok(ProcessOutcome::DeadLettered)
    }

    async fn acknowledge(&self, id: EntryId) -> Result<(), PipelineError> {
        let ids = [id];

        retry_transient(Backoff::default(), None, || {
            self.store.ack(&self.stream, &self.group, &ids)
        })
        .await
        .map(|_| ())
        .map_err(|source| PipelineError::Store { id, source })
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::consumer::dead_letter::DeadLetterPolicy;
    use crate::library::codec::JsonCodec;
    use crate::library::store::{GroupStart, MemoryStreamStore, ReadPosition};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    const STREAM: &str = "orders";
    const GROUP: &str = "billing";

    enum Verdict {
        Accept,
        Retry,
        Reject,
    }

    struct TestHandler {
        verdict: Verdict,
        seen: Mutex<Vec<String>>,
    }

    impl TestHandler {
        fn new(verdict: Verdict) -> Self {
            Self {
                verdict,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Handler for TestHandler {
        type Content = String;

        async fn handle(
            &self,
            message: MessageFrame<String>,
            _cancel: &CancellationToken,
        ) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(message.into_inner());

            match self.verdict {
                Verdict::Accept => Ok(()),
                Verdict::Retry => Err(HandlerError::retry("try again")),
                Verdict::Reject => Err(HandlerError::reject("never")),
            }
        }
    }

    async fn deliver(store: &MemoryStreamStore, fields: &[(&str, &[u8])]) -> StreamEntry {
        store
            .create_group(STREAM, GROUP, &GroupStart::Head, true)
            .await
            .unwrap();
        store.append(STREAM, fields).await.unwrap();

        store
            .read_group(STREAM, GROUP, "c1", &ReadPosition::New, 1)
            .await
            .unwrap()
            .remove(0)
    }

    fn pipeline(store: &Arc<MemoryStreamStore>) -> ProcessingPipeline<MemoryStreamStore, JsonCodec> {
        ProcessingPipeline::new(store.clone(), JsonCodec, STREAM, GROUP, "payload")
    }

    fn frame(content: &str) -> Vec<u8> {
        JsonCodec.encode(&MessageFrame::new("test", content)).unwrap()
    }

    #[tokio::test]
    async fn acknowledge_handled_entries() {
        let store = Arc::new(MemoryStreamStore::new());
        let payload = frame("m1");
        let entry = deliver(&store, &[("payload", payload.as_slice())]).await;
        let handler = TestHandler::new(Verdict::Accept);

        let outcome = pipeline(&store)
            .process(&entry, 1, &handler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Acknowledged);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["m1".to_string()]);
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drop_entries_without_payload() {
        let store = Arc::new(MemoryStreamStore::new());
        let entry = deliver(&store, &[("other", &b"x"[..])]).await;
        let handler = TestHandler::new(Verdict::Accept);

        let outcome = pipeline(&store)
            .process(&entry, 1, &handler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Dropped);
        assert!(handler.seen.lock().unwrap().is_empty());
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn leave_undecodable_entries_pending() {
        let store = Arc::new(MemoryStreamStore::new());
        let entry = deliver(&store, &[("payload", &b"not json"[..])]).await;
        let handler = TestHandler::new(Verdict::Accept);

        let result = pipeline(&store)
            .process(&entry, 1, &handler, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PipelineError::Decode { id, .. }) if id == entry.id));
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn leave_entries_pending_on_retry() {
        let store = Arc::new(MemoryStreamStore::new());
        let payload = frame("m1");
        let entry = deliver(&store, &[("payload", payload.as_slice())]).await;
        let handler = TestHandler::new(Verdict::Retry);

        let outcome = pipeline(&store)
            .process(&entry, 1, &handler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::LeftPending);
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn leave_rejected_entries_pending_without_dead_letter_stream() {
        let store = Arc::new(MemoryStreamStore::new());
        let payload = frame("m1");
        let entry = deliver(&store, &[("payload", payload.as_slice())]).await;
        let handler = TestHandler::new(Verdict::Reject);

        let outcome = pipeline(&store)
            .process(&entry, 1, &handler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::LeftPending);
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dead_letter_rejected_entries() {
        let store = Arc::new(MemoryStreamStore::new());
        let payload = frame("m1");
        let entry = deliver(&store, &[("payload", payload.as_slice())]).await;
        let handler = TestHandler::new(Verdict::Reject);
        let policy = DeadLetterPolicy {
            stream: "dead".into(),
            max_deliveries: 3,
        };
        let router = DeadLetterRouter::new(store.clone(), STREAM, GROUP, "payload", policy);

        let outcome = pipeline(&store)
            .with_dead_letter(router)
            .process(&entry, 1, &handler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::DeadLettered);
        assert_eq!(store.len("dead"), 1);
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retry_transient_acknowledgement_failures() {
        let store = Arc::new(MemoryStreamStore::new());
        let payload = frame("m1");
        let entry = deliver(&store, &[("payload", payload.as_slice())]).await;
        let handler = TestHandler::new(Verdict::Accept);

        store.inject_connection_failures(2);
        let outcome = pipeline(&store)
            .process(&entry, 1, &handler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Acknowledged);
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_entries_pending_when_acknowledgement_keeps_failing() {
        let store = Arc::new(MemoryStreamStore::new());
        let payload = frame("m1");
        let entry = deliver(&store, &[("payload", payload.as_slice())]).await;
        let handler = TestHandler::new(Verdict::Accept);

        // One initial attempt plus every retry the backoff allows
        store.inject_connection_failures(Backoff::default().count() + 1);
        let outcome = pipeline(&store)
            .process(&entry, 1, &handler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::LeftPending);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["m1".to_string()]);
        assert_eq!(store.pending_summary(STREAM, GROUP).await.unwrap(), 1);
    }
}
