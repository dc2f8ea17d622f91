//! Backoff policy for transient portal failures.
//!
//! Only `Network` and `RateLimited` errors are retried (see
//! [`ErrorKind::is_transient`]). Delays double per attempt from the base
//! delay, capped per delay and in total. A `Retry-After` hint from the
//! portal replaces the computed delay (still subject to the caps).

use std::time::Duration;

use crate::config::Config;
use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
            max_total_wait: config.retry_max_total_wait,
        }
    }

    /// Exponential delay after the given (1-based) failed attempt.
    /// 500ms → 1s → 2s ... capped at `max_delay`.
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// How long to wait before the next attempt, or `None` if the error
    /// should propagate now: not transient, out of attempts, or the wait
    /// would blow the total budget.
    pub fn next_delay(&self, attempt: u32, waited: Duration, error: &ErrorKind) -> Option<Duration> {
        if !error.is_transient() || attempt >= self.max_attempts {
            return None;
        }

        let delay = match error {
            ErrorKind::RateLimited { retry_after } if !retry_after.is_zero() => {
                (*retry_after).min(self.max_delay)
            }
            _ => self.exponential_delay(attempt),
        };

        if waited.saturating_add(delay) > self.max_total_wait {
            return None;
        }
        Some(delay)
    }
}
