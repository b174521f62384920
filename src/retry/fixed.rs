//! 固定延迟重试策略

use super::{is_transient, RetryPolicy};
use crate::error::Error;
use std::time::Duration;

/// 固定延迟重试策略
pub struct FixedRetryPolicy {
    max_attempts: usize,
    delay: Duration,
}

impl FixedRetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }
}

impl RetryPolicy for FixedRetryPolicy {
    fn should_retry(&self, attempt: usize, error: &Error) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        is_transient(error)
    }

    fn backoff_duration(&self, _attempt: usize) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay() {
        let policy = FixedRetryPolicy::new(2, Duration::from_millis(50));
        assert_eq!(policy.backoff_duration(0), Duration::from_millis(50));
        assert_eq!(policy.backoff_duration(5), Duration::from_millis(50));
        assert_eq!(policy.max_attempts(), 2);
    }
}
