use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::ServiceError;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `initial_delay × attempt`
    Linear,
    /// `initial_delay × factor^(attempt - 1)`
    Exponential { factor: f64 },
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }
}

impl RetryConfig {
    /// Linear backoff: waits `step`, `2 × step`, ... between attempts.
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: step,
            max_delay: Duration::from_secs(5),
            backoff: Backoff::Linear,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            Backoff::Linear => self.initial_delay.saturating_mul(attempt),
            Backoff::Exponential { factor } => {
                let secs = self.initial_delay.as_secs_f64() * factor.powi(attempt as i32 - 1);
                Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
            }
        };
        delay.min(self.max_delay)
    }
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Retries version-stamp conflicts and nothing else.
pub struct ConflictRetryPolicy;

impl RetryPolicy<ServiceError> for ConflictRetryPolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        error.is_conflict()
    }
}

/// Execute an async function with retries
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!("Operation succeeded after {} attempts", attempts);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    warn!("Operation failed after {} attempts: {}", attempts, error);
                    return Err(error);
                }

                let delay = config.delay_for(attempts);
                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempts, error, delay
                );

                sleep(delay).await;
            }
        }
    }
}
