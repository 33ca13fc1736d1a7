//! Retry strategy: exponential backoff with jitter for transient ledger failures

use ledger_core::{Error as LedgerError, Result as LedgerResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Backoff settings for ledger commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound on any delay
    pub max_delay_ms: u64,
    /// Growth factor per retry
    pub backoff_multiplier: f64,
    /// Random spread as a fraction of the delay
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay_ms: 50,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

/// Retries transient ledger failures
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    /// Strategy with explicit settings
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Strategy with default settings
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Calculate delay for nth retry with exponential backoff + jitter
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);

        // Cap at max_delay
        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        let jitter_range = capped_delay * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Execute a ledger operation, retrying transient failures
    ///
    /// The operation must be idempotent across attempts.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        operation: F,
        operation_name: &str,
    ) -> LedgerResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = LedgerResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.calculate_delay(attempt - 1);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_retries = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying ledger operation"
                );
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempt, "Ledger operation succeeded on retry"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !self.is_retryable_error(&e) {
                        return Err(e);
                    }

                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        attempts = self.config.max_retries + 1,
                        error = %e,
                        "Ledger operation failed"
                    );

                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            LedgerError::Storage("Max retries exceeded without error".to_string())
        }))
    }

    /// Determine if an error is retryable
    fn is_retryable_error(&self, error: &LedgerError) -> bool {
        error.is_transient()
    }
}
