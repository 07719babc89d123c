//! Retry with exponential backoff
//!
//! Used by the status push service where a back-end answers with a
//! transient `Error` result that may succeed on the next attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    /// Cap for the delay between two attempts.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Run `operation` until `should_retry` rejects its outcome or the attempts
/// are exhausted. Returns the last outcome.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&T) -> bool,
    operation_name: &str,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
{
    let attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        let outcome = operation().await;

        if !should_retry(&outcome) {
            if attempt > 1 {
                info!(operation = operation_name, attempt, "Succeeded after retry");
            }
            return outcome;
        }

        if attempt >= attempts {
            warn!(
                operation = operation_name,
                attempt, "Giving up after transient failures"
            );
            return outcome;
        }

        warn!(
            operation = operation_name,
            attempt,
            max_attempts = attempts,
            retry_in_ms = delay.as_millis() as u64,
            "Transient failure, retrying"
        );
        tokio::time::sleep(delay).await;

        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn stops_at_first_acceptable_outcome() {
        let calls = AtomicU32::new(0);
        let outcome = retry_with_backoff(
            &fast(),
            || async { calls.fetch_add(1, Ordering::SeqCst) + 1 },
            |n| *n < 2,
            "count",
        )
        .await;
        assert_eq!(outcome, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn returns_last_outcome_when_exhausted() {
        let calls = AtomicU32::new(0);
        let outcome = retry_with_backoff(
            &fast(),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                false
            },
            |ok| !*ok,
            "always_failing",
        )
        .await;
        assert!(!outcome);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn none_makes_a_single_attempt() {
        let calls = AtomicU32::new(0);
        retry_with_backoff(
            &RetryConfig::none(),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
            },
            |_| true,
            "once",
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
