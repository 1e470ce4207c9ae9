use super::Backoff;
use crate::library::store::StoreError;
use std::future::Future;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Repeats a store operation for as long as it fails with a
/// [transient](StoreError::is_transient) error and the `backoff` yields delays.
///
/// Any other error is returned immediately. When a `cancel` token is passed and fires
/// while waiting for the next attempt, the last error is returned without issuing
/// another call to the store.
pub async fn retry_transient<T, F, Fut>(
    mut backoff: Backoff,
    cancel: Option<&CancellationToken>,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    loop {
        let error = match operation().await {
            Err(error) if error.is_transient() => error,
            result => return result,
        };

        let delay = match backoff.next() {
            Some(delay) => delay,
            None => {
                warn!(%error, "Giving up on store operation after exhausting retries");
                return Err(error);
            }
        };

        warn!(%error, ?delay, "Store operation failed, retrying");

        match cancel {
            Some(cancel) => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Retry aborted by cancellation");
                        return Err(error);
                    }
                    _ = sleep(delay) => {}
                }
            }
            None => sleep(delay).await,
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn connection_error() -> StoreError {
        StoreError::Connection("connection reset by peer".into())
    }

    #[tokio::test(start_paused = true)]
    async fn retry_transient_failures() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;

        let result = retry_transient(Backoff::default(), None, move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(connection_error())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn not_retry_permanent_failures() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;

        let result: Result<(), _> = retry_transient(Backoff::default(), None, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::MissingStream("orders".into()))
        })
        .await;

        assert!(matches!(result, Err(StoreError::MissingStream(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn give_up_when_backoff_is_exhausted() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let backoff = Backoff::new(Duration::from_millis(10), 2);

        let result: Result<(), _> = retry_transient(backoff, None, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(connection_error())
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_retrying_once_cancelled() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = retry_transient(Backoff::default(), Some(&cancel), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(connection_error())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
