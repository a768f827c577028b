use std::time::Duration;

use crate::config::QueueConfig;

/// Bounded exponential backoff for replaying queued actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts per action, including the first
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl RetryPolicy {
  /// One attempt, no retries: a failed replay is dead-lettered immediately.
  pub fn once() -> Self {
    Self {
      max_attempts: 1,
      base_delay: Duration::ZERO,
      max_delay: Duration::ZERO,
    }
  }

  /// Delay before the attempt following `attempt` (1-based).
  pub fn delay_after(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    self
      .base_delay
      .saturating_mul(1u32 << exponent)
      .min(self.max_delay)
  }

  pub fn allows_retry_after(&self, attempt: u32) -> bool {
    attempt < self.max_attempts
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from(&QueueConfig::default())
  }
}

impl From<&QueueConfig> for RetryPolicy {
  fn from(config: &QueueConfig) -> Self {
    Self {
      max_attempts: config.max_attempts.max(1),
      base_delay: Duration::from_millis(config.base_delay_ms),
      max_delay: Duration::from_millis(config.max_delay_ms),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy {
      max_attempts: 6,
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(3),
    };

    assert_eq!(policy.delay_after(1), Duration::from_millis(500));
    assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
    assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
    assert_eq!(policy.delay_after(4), Duration::from_secs(3));
    assert_eq!(policy.delay_after(40), Duration::from_secs(3));
  }

  #[test]
  fn test_attempt_budget() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts, 3);
    assert!(policy.allows_retry_after(2));
    assert!(!policy.allows_retry_after(3));

    assert!(!RetryPolicy::once().allows_retry_after(1));
  }

  #[test]
  fn test_zero_attempts_config_still_tries_once() {
    let policy = RetryPolicy::from(&QueueConfig {
      max_attempts: 0,
      base_delay_ms: 10,
      max_delay_ms: 100,
    });
    assert_eq!(policy.max_attempts, 1);
  }
}
