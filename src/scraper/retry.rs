use crate::config::FetchConfig;
use crate::error::FetchError;
use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::warn;

/// Bounded retry: `max_attempts` tries with a fixed pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.retry_backoff_ms))
    }

    /// Pauses between attempts; one fewer than `max_attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        FixedInterval::new(self.backoff).take(self.max_attempts as usize - 1)
    }

    /// Run `action` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget runs out. The last error is wrapped in `Exhausted`.
    pub async fn run<A, F, T>(&self, url: &str, action: A) -> Result<T, FetchError>
    where
        A: FnMut() -> F,
        F: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0u32;
        let result = RetryIf::start(self.delays(), action, |e: &FetchError| {
            attempt += 1;
            if e.is_retryable() && attempt < self.max_attempts {
                warn!(
                    "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                    attempt, self.max_attempts, url, e, self.backoff
                );
            }
            e.is_retryable()
        })
        .await;

        result.map_err(|last| {
            if last.is_retryable() {
                FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: self.max_attempts,
                    last: Box::new(last),
                }
            } else {
                last
            }
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}
