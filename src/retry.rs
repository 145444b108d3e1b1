use crate::error::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum RetryStrategy {
    None,
    Exponential { max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64 },
}

impl RetryStrategy {
    /// Backoff used for relay forwarding: 4 attempts, 200ms doubling to 2s.
    pub fn relay_default() -> Self {
        RetryStrategy::Exponential {
            max_attempts: 4,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
        }
    }
}

/// Retry executor for recoverable operations.
///
/// Only errors for which [`crate::error::HosterError::is_recoverable`] holds are retried;
/// anything else is returned on first failure.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    strategy: RetryStrategy,
}

impl RetryExecutor {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self { strategy }
    }

    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match &self.strategy {
            RetryStrategy::None => operation().await,
            RetryStrategy::Exponential { max_attempts, base_delay_ms, max_delay_ms } => {
                self.execute_exponential(operation, *max_attempts, *base_delay_ms, *max_delay_ms).await
            }
        }
    }

    async fn execute_exponential<F, Fut, T>(
        &self,
        operation: F,
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut delay = base_delay_ms;
        let mut attempt = 1;

        loop {
            debug!("Attempt {} of {}", attempt, max_attempts);

            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_recoverable() || attempt >= max_attempts {
                        return Err(err);
                    }

                    warn!("Attempt {} failed: {}, retrying in {}ms", attempt, err, delay);
                    sleep(Duration::from_millis(delay)).await;

                    // Exponential backoff with cap
                    delay = std::cmp::min(delay.saturating_mul(2), max_delay_ms);
                    attempt += 1;
                }
            }
        }
    }
}
