//! Fixed-delay retry with cooperative cancellation

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use super::config::RetryConfig;
use crate::error::{ODataError, Result};

/// Retries transient failures (transport errors and 5xx)
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails permanently or retries run out
    ///
    /// Cancellation is checked before every attempt and races the delay.
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ODataError::Cancelled);
            }

            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", operation_name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        operation_name,
                        e,
                        attempt,
                        self.config.max_retries,
                        self.config.delay()
                    );
                    sleep_cancellable(self.config.delay(), cancel).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first
pub async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    if duration.is_zero() {
        return if cancel.is_cancelled() {
            Err(ODataError::Cancelled)
        } else {
            Ok(())
        };
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(ODataError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            delay_ms: 0,
        })
    }

    fn server_error() -> ODataError {
        ODataError::from_status(500, "People", "boom")
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = policy(3)
            .execute("get", &CancellationToken::new(), || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(server_error()) } else { Ok(n) } }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = policy(3)
            .execute("get", &CancellationToken::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ODataError::from_status(400, "People", "bad")) }
            })
            .await;
        assert!(matches!(result, Err(ODataError::Client { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = policy(2)
            .execute("get", &CancellationToken::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error()) }
            })
            .await;
        assert!(matches!(result, Err(ODataError::Server { status: 500, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = policy(3).execute("get", &cancel, || async { Ok(()) }).await;
        assert!(matches!(result, Err(ODataError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_delay() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 3,
            delay_ms: 60_000,
        });

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<()> = policy
            .execute("get", &cancel, || async { Err(server_error()) })
            .await;
        assert!(matches!(result, Err(ODataError::Cancelled)));
    }
}
