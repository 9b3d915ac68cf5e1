//! Coordinator configuration.

use rand::Rng;
use std::time::Duration;

/// Configuration for a [`TransactionCoordinator`](crate::TransactionCoordinator).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Retry behaviour for retry-wrapped actions.
    pub retry: RetryConfig,

    /// Keep a finished transaction's operation log for inspection.
    pub retain_log: bool,

    /// How store execution failures are classified.
    pub execution_failure_policy: ExecutionFailurePolicy,

    /// Number of finished transaction summaries to keep.
    pub history_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            retain_log: false,
            execution_failure_policy: ExecutionFailurePolicy::Propagate,
            history_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets whether finished transactions keep their operation log.
    #[must_use]
    pub const fn retain_log(mut self, value: bool) -> Self {
        self.retain_log = value;
        self
    }

    /// Sets the execution failure policy.
    #[must_use]
    pub const fn execution_failure_policy(mut self, policy: ExecutionFailurePolicy) -> Self {
        self.execution_failure_policy = policy;
        self
    }

    /// Sets the number of finished transaction summaries to keep.
    #[must_use]
    pub const fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

/// Classification of failures raised by a store while executing a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionFailurePolicy {
    /// Surface the store error as [`CoreError::Store`](crate::CoreError::Store).
    /// Such errors are never retried.
    #[default]
    Propagate,
    /// Report every execution failure as a retryable lock conflict.
    TreatAsConflict,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt bound.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration with a single attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before the attempt following `failed_attempt`
    /// (1-indexed). Attempt 0 has no delay.
    #[must_use]
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> Duration {
        if failed_attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(failed_attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CoordinatorConfig::default();
        assert!(!config.retain_log);
        assert_eq!(
            config.execution_failure_policy,
            ExecutionFailurePolicy::Propagate
        );
        assert_eq!(config.history_capacity, 256);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn builder_pattern() {
        let config = CoordinatorConfig::new()
            .retain_log(true)
            .execution_failure_policy(ExecutionFailurePolicy::TreatAsConflict)
            .history_capacity(4)
            .retry(RetryConfig::no_retry());

        assert!(config.retain_log);
        assert_eq!(
            config.execution_failure_policy,
            ExecutionFailurePolicy::TreatAsConflict
        );
        assert_eq!(config.history_capacity, 4);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn retry_delay_doubles() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(20).with_max_delay(Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(15), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let config = RetryConfig::default().with_jitter(true);
        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }
}
