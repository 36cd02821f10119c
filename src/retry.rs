//! Bounded retry and polling with a fixed delay.
//!
//! Two flavours are provided:
//!
//! - [`retry_with_backoff`] re-runs a fallible async operation until it
//!   succeeds or the attempt budget runs out. Used for control endpoint
//!   mutations.
//! - [`poll_until`] re-runs an async check until it reports `true` or the
//!   attempt budget runs out. Used for readiness polling of the gate, the
//!   primary switch and application pods.
//!
//! Both take a [`Sleeper`] so tests can run without wall-clock waits.
//!
//! # Example
//!
//! ```ignore
//! use spp_operator::retry::{poll_until, RetryConfig, TokioSleeper};
//!
//! let ready = poll_until(
//!     &RetryConfig::new(6, Duration::from_secs(10)),
//!     "ctl_ready",
//!     &TokioSleeper,
//!     || async { endpoint.processes().await.is_some() },
//! ).await;
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

#[cfg(test)]
use mockall::automock;

/// Something that can wait for a duration.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `delay`
    async fn sleep(&self, delay: Duration);
}

/// Sleeper backed by the tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Attempt budget and fixed delay between attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Create a config with the given attempt budget and delay
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A config that runs the operation exactly once
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Execute an async operation, retrying with a fixed delay.
///
/// Returns the first success, or the last error once `max_attempts` is
/// exhausted. No delay follows the final attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    sleeper: &dyn Sleeper,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.attempts();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = config.delay.as_millis(),
                    "Operation failed, retrying"
                );

                sleeper.sleep(config.delay).await;
            }
        }
    }
}

/// Poll `check` until it returns `true` or the attempt budget is exhausted.
///
/// Returns whether the condition was observed.
pub async fn poll_until<F, Fut>(
    config: &RetryConfig,
    check_name: &str,
    sleeper: &dyn Sleeper,
    mut check: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let attempts = config.attempts();

    for attempt in 1..=attempts {
        if check().await {
            debug!(check = %check_name, attempt, "condition met");
            return true;
        }
        if attempt < attempts {
            debug!(
                check = %check_name,
                attempt,
                delay_ms = config.delay.as_millis(),
                "condition not met, polling again"
            );
            sleeper.sleep(config.delay).await;
        }
    }

    warn!(check = %check_name, attempts, "condition not met within attempt budget");
    false
}
