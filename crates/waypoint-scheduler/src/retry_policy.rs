use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetryPolicyError {
    #[error("multiplier must be >= 1, got {0}")]
    MultiplierBelowOne(f64),
}

/// Exponential backoff with a hard retry ceiling, per spec §4.8.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    multiplier: f64,
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, multiplier: f64, max_retries: u32) -> Result<Self, RetryPolicyError> {
        if multiplier < 1.0 {
            return Err(RetryPolicyError::MultiplierBelowOne(multiplier));
        }
        Ok(Self { base_delay_ms, multiplier, max_retries })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `delay(attempt) = baseDelayMs × multiplier^(attempt-1)`, 1-indexed.
    pub fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        let attempt = attempt.max(1);
        let factor = self.multiplier.powi((attempt - 1) as i32);
        let delay_ms = (self.base_delay_ms as f64 * factor).round() as u64;
        std::time::Duration::from_millis(delay_ms)
    }

    /// `shouldRetry(task, attempt) = attempt ≤ maxRetries ∧ task.retryCount < maxRetries`.
    pub fn should_retry(&self, task_retry_count: u32, attempt: u32) -> bool {
        attempt <= self.max_retries && task_retry_count < self.max_retries
    }
}
