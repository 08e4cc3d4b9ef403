use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use backon::{ExponentialBuilder, Retryable};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub fn new_backoff() -> ExponentialBuilder {
    ExponentialBuilder::new()
        .with_jitter()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(10))
}

/// Default for collaborator calls made during a maintenance pass.
pub fn new_backoff_limited() -> ExponentialBuilder {
    new_backoff().with_max_times(5)
}

fn notify<E: std::fmt::Debug>(action: &str) -> impl FnMut(&E, Duration) {
    move |e, d| {
        warn!("Retrying {} after {:?}: {:?}", action, d, e);
    }
}

fn retryable<E>(cancel_token: CancellationToken) -> impl FnMut(&E) -> bool {
    move |_| !cancel_token.is_cancelled()
}

/// Runs `operation` until it succeeds, `backoff` is exhausted or
/// `cancel_token` fires. The last error is returned; a pending backoff sleep
/// is abandoned as soon as the token fires.
pub async fn retry<T, E, F, Fut>(
    operation: F,
    action: &str,
    backoff: ExponentialBuilder,
    cancel_token: CancellationToken,
) -> Result<T>
where
    E: std::fmt::Debug + Into<Error>,
    Fut: Future<Output = Result<T, E>>,
    F: FnMut() -> Fut,
{
    select! {
        biased;
        result = operation
            .retry(&backoff)
            .notify(notify(action))
            .when(retryable(cancel_token.clone())) => result.map_err(Into::into),
        _ = cancel_token.cancelled() => Err(anyhow!("{} cancelled", action)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn fast() -> ExponentialBuilder {
        ExponentialBuilder::new()
            .with_min_delay(Duration::from_millis(1))
            .with_max_times(3)
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result = retry(
            || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow!("not yet"))
                } else {
                    Ok(7)
                }
            },
            "test",
            fast(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_when_cancelled() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let cancel_token = CancellationToken::new();
        cancel_token.cancel();
        let result: Result<()> = retry(
            || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("down"))
            },
            "test",
            fast(),
            cancel_token,
        )
        .await;
        assert!(result.is_err());
        assert!(counter.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn test_retry_abandons_backoff_sleep_on_cancel() {
        let cancel_token = CancellationToken::new();
        let canceller = cancel_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let slow = ExponentialBuilder::new()
            .with_min_delay(Duration::from_secs(30))
            .with_max_times(3);
        let started = std::time::Instant::now();
        let result: Result<()> = retry(
            || async { Err(anyhow!("down")) },
            "test",
            slow,
            cancel_token,
        )
        .await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
