use std::{future::Future, time::Duration};

use tokio::time::sleep;

use crate::{config::RetryConfig, error::TriageError};

/// Bounded exponential backoff for calls that report rate limiting.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`; `attempt` is 1-based.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_backoff);
        }
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Rate limits and tracker outages are retried.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, TriageError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TriageError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let retry_after = match &err {
                TriageError::ProvisionerRateLimited { retry_after, .. } => *retry_after,
                TriageError::TrackerUnavailable(_) => None,
                _ => return Err(err),
            };
            if attempt >= attempts {
                tracing::warn!(
                    target: "pipeline",
                    operation,
                    attempts,
                    error = %err,
                    "retry budget exhausted"
                );
                return Err(err);
            }
            let delay = self.delay_for(attempt, retry_after);
            tracing::warn!(
                target: "pipeline",
                operation,
                attempt,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after backoff"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
