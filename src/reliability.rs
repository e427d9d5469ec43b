//! Retry utilities built on the `backon` crate.
//!
//! Two shapes of retry are used by the engine:
//!
//! - [`RetryConfig::network`]: exponential backoff for notification delivery.
//! - [`RetryConfig::truncate_confirm`]: constant jittered delay for the
//!   truncate-confirm loop, where the next attempt should come soon but not
//!   in lock-step with a racing writer.

use std::future::Future;
use std::time::Duration;

use backon::{ConstantBuilder, ExponentialBuilder, Retryable};
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff; `1.0` means constant delay.
    pub factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::network()
    }
}

impl RetryConfig {
    /// Network delivery: a few retries with growing delays.
    #[must_use]
    pub fn network() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(20),
            factor: 2.0,
        }
    }

    /// Truncate confirmation: up to 8 retries a few hundred milliseconds apart.
    #[must_use]
    pub fn truncate_confirm() -> Self {
        Self {
            max_retries: 8,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(200),
            factor: 1.0,
        }
    }

    /// Set maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay (and the cap, for constant configs).
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        if self.factor <= 1.0 || self.max_delay < delay {
            self.max_delay = delay;
        }
        self
    }

    fn max_times(&self) -> usize {
        usize::try_from(self.max_retries).unwrap_or(usize::MAX)
    }

    fn exponential(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_times())
            .with_factor(self.factor)
            .with_jitter()
    }

    fn constant(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.initial_delay)
            .with_max_times(self.max_times())
            .with_jitter()
    }
}

/// Retry an async operation while `is_retryable` holds for its error.
///
/// Exponential configs back off; configs with `factor <= 1.0` use a constant
/// jittered delay. Every failed attempt that will be retried is logged with
/// `operation` as context.
///
/// # Returns
///
/// The result of the operation, or the last error if all retries failed.
pub async fn retry_async<F, Fut, T, E, R>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
    is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_retries = config.max_retries;
    let mut attempt = 0u32;
    let notify = |err: &E, dur: Duration| {
        attempt += 1;
        warn!(
            operation = %operation_name,
            attempt = attempt,
            max_retries = max_retries,
            next_delay_ms = u64::try_from(dur.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Attempt failed, will retry"
        );
    };

    if config.factor <= 1.0 {
        operation
            .retry(config.constant())
            .when(is_retryable)
            .notify(notify)
            .await
    } else {
        operation
            .retry(config.exponential())
            .when(is_retryable)
            .notify(notify)
            .await
    }
}

/// Check if an HTTP status code is retryable.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}
