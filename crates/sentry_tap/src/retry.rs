//! Retry utilities for transient network failures.
//!
//! Retrying happens below the stream-abort policy: a page fetch is retried a
//! few times on connection-level errors, and only once retries are exhausted
//! does the error abort the stream.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;

use crate::error::TapError;

/// Initial backoff delay.
pub const INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff ceiling.
pub const MAX_BACKOFF_MS: u64 = 10_000;
/// Retry attempts before a network error is surfaced.
pub const MAX_NETWORK_RETRIES: usize = 3;

/// Configuration for retry operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: MAX_NETWORK_RETRIES,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Disable retries entirely (used by pagination tests that count
    /// requests).
    #[must_use]
    pub fn none() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries: 0,
            with_jitter: false,
        }
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Execute an operation, retrying transient network errors with backoff.
pub async fn with_network_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, TapError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TapError>>,
{
    operation
        .retry(config.backoff())
        .when(TapError::is_retryable)
        .notify(|err, dur| {
            tracing::debug!("transient error, retrying in {:?}: {}", dur, err);
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_config_matches_constants() {
        let config = RetryConfig::default();
        assert_eq!(config.min_delay, Duration::from_millis(INITIAL_BACKOFF_MS));
        assert_eq!(config.max_delay, Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(config.max_retries, MAX_NETWORK_RETRIES);
        assert!(config.with_jitter);
    }

    #[tokio::test]
    async fn network_errors_are_retried_until_success() {
        let config = RetryConfig::new(Duration::ZERO, Duration::ZERO, 5);
        let attempts = AtomicU32::new(0);

        let result = with_network_retry(&config, || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TapError::network("connection reset"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn api_errors_are_not_retried() {
        let config = RetryConfig::new(Duration::ZERO, Duration::ZERO, 5);
        let attempts = AtomicU32::new(0);

        let result: Result<(), TapError> = with_network_retry(&config, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(TapError::from_status(500, "boom"))
        })
        .await;

        assert!(matches!(result, Err(TapError::Api { status: 500, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
