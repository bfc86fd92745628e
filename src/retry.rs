//! Bounded exponential backoff for the upload transfer loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total tries for one request, including the first.
  pub max_attempts: u32,
  pub initial_backoff_ms: u64,
  pub max_backoff_ms: u64,
  pub multiplier: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      initial_backoff_ms: 1_000,
      max_backoff_ms: 32_000,
      multiplier: 2.0,
    }
  }
}

impl RetryPolicy {
  /// A policy that never waits, for tests and one-shot tools.
  pub fn immediate(max_attempts: u32) -> Self {
    Self {
      max_attempts,
      initial_backoff_ms: 0,
      max_backoff_ms: 0,
      multiplier: 1.0,
    }
  }

  /// Whether another try is allowed after `failures` consecutive failures.
  pub fn allows_retry(&self, failures: u32) -> bool {
    failures < self.max_attempts
  }

  /// Delay before the retry that follows failure number `failures` (1-based).
  ///
  /// ```rust
  /// use shorts_uploader::retry::RetryPolicy;
  /// use std::time::Duration;
  ///
  /// let policy = RetryPolicy::default();
  /// assert_eq!(policy.backoff(1), Duration::from_secs(1));
  /// assert_eq!(policy.backoff(2), Duration::from_secs(2));
  /// assert_eq!(policy.backoff(3), Duration::from_secs(4));
  /// assert_eq!(policy.backoff(10), Duration::from_secs(32));
  /// ```
  pub fn backoff(&self, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(32) as i32;
    let millis = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
    Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_attempt_budget() {
    let policy = RetryPolicy {
      max_attempts: 3,
      ..RetryPolicy::default()
    };
    assert!(policy.allows_retry(1));
    assert!(policy.allows_retry(2));
    assert!(!policy.allows_retry(3));
  }

  #[test]
  fn test_backoff_is_capped() {
    let policy = RetryPolicy {
      max_attempts: 50,
      initial_backoff_ms: 500,
      max_backoff_ms: 5_000,
      multiplier: 3.0,
    };
    assert_eq!(policy.backoff(1), Duration::from_millis(500));
    assert_eq!(policy.backoff(2), Duration::from_millis(1_500));
    assert_eq!(policy.backoff(3), Duration::from_millis(4_500));
    assert_eq!(policy.backoff(4), Duration::from_millis(5_000));
    assert_eq!(policy.backoff(40), Duration::from_millis(5_000));
  }

  #[test]
  fn test_immediate_never_sleeps() {
    let policy = RetryPolicy::immediate(4);
    assert!((1..10).all(|n| policy.backoff(n) == Duration::ZERO));
    assert!(!policy.allows_retry(4));
  }
}
