//! Bounded exponential backoff for read-after-create metadata lag
//!
//! Kafka propagates a new topic's metadata asynchronously, so a read right
//! after creation can report the topic as unknown. Only that outcome is
//! retried; every other error is surfaced on the first attempt.

use crate::error::{OperatorError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Configuration for the metadata backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Delay to wait after the given (1-indexed) failed attempt
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        // cap the exponent to keep powi well inside f64 range
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let millis =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Repeat `read` until it returns `Some`, backing off between attempts.
///
/// `Ok(None)` means "not visible yet". Errors are returned immediately, and
/// running out of attempts yields [`OperatorError::MetadataTimeout`].
pub async fn retry_until_visible<T, F, Fut>(
    config: &RetryConfig,
    topic: &str,
    mut read: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if let Some(value) = read().await? {
            return Ok(value);
        }
        if attempt < max_attempts {
            let delay = config.delay_after_attempt(attempt);
            debug!(
                topic = %topic,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Topic metadata not visible yet, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    Err(OperatorError::MetadataTimeout {
        topic: topic.to_string(),
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KafkaError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 6);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_after_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_after_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_after_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_after_attempt(20), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_visible() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = retry_until_visible(&RetryConfig::default(), "orders", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((n == 3).then_some(n))
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_bound() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let config = RetryConfig::default().with_max_attempts(4);
        let err = retry_until_visible(&config, "orders", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<()>, OperatorError>(None)
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            OperatorError::MetadataTimeout { attempts: 4, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = retry_until_visible(&RetryConfig::default(), "orders", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<Option<()>, _>(OperatorError::from(KafkaError::Client(
                "broker down".to_string(),
            )))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, OperatorError::Kafka(KafkaError::Client(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
