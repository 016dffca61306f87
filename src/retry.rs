//! Backoff policy for relay steps
//!
//! Proof building and submission retry; commitment waits have their own
//! round budget. The delay for attempt `n` (0-indexed)
//! is `initial_backoff * backoff_multiplier^n`, capped at `max_backoff`.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RelayError;

/// Relay retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retried steps per message
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Whether another attempt is allowed after `attempts` failures
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }

    /// Decide what to do after a failed submission
    pub fn next_action(&self, error: &RelayError, attempts: u32) -> RetryAction {
        if !error.is_retryable() {
            return RetryAction::GiveUp;
        }
        if !self.should_retry(attempts) {
            debug!(attempts, max = self.max_retries, "Retry budget exhausted");
            return RetryAction::GiveUp;
        }
        RetryAction::Retry(self.backoff_for_attempt(attempts.saturating_sub(1)))
    }
}

/// Action to take after a failure
#[derive(Debug, Clone, PartialEq)]
pub enum RetryAction {
    /// Retry after the given delay
    Retry(Duration),
    /// Stop and report the error
    GiveUp,
}

/// Sleep for `delay` unless `cancel` fires first
pub async fn backoff_sleep(delay: Duration, cancel: &CancellationToken) -> Result<(), RelayError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RelayError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        };

        assert_eq!(config.backoff_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_secs(8));
        assert_eq!(config.backoff_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_next_action() {
        let config = RetryConfig::default();
        let transient = RelayError::RpcUnavailable("connection reset".into());

        assert_eq!(
            config.next_action(&transient, 1),
            RetryAction::Retry(Duration::from_secs(1))
        );
        assert_eq!(
            config.next_action(&transient, 3),
            RetryAction::Retry(Duration::from_secs(4))
        );
        assert_eq!(config.next_action(&transient, 5), RetryAction::GiveUp);
        assert_eq!(
            config.next_action(&RelayError::ProofUnavailable("pruned".into()), 1),
            RetryAction::GiveUp
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleep_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            backoff_sleep(Duration::from_secs(30), &cancel).await,
            Err(RelayError::Cancelled)
        );
        assert!(backoff_sleep(Duration::from_secs(1), &CancellationToken::new())
            .await
            .is_ok());
    }
}
