//! Bounded exponential backoff with jitter, shared by the reasoning client and the exporter.

use std::time::Duration;

use rand::Rng;

/// Retry policy for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never exceeded.
    pub max_attempts: u32,
    /// Backoff before the first retry; doubled for each further retry.
    pub base_delay: Duration,
    /// Cap on any single backoff, including server-provided hints.
    pub max_delay: Duration,
    /// Deadline for one attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// A server hint (e.g. `Retry-After`) is honoured up to `max_delay` with ±10%
    /// jitter; otherwise full jitter over `base_delay * 2^(retry-1)`.
    pub fn backoff(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let mut rng = rand::thread_rng();
        match hint {
            Some(hint) => {
                let capped = hint.min(self.max_delay);
                let factor: f64 = rng.gen_range(0.9_f64..=1.1_f64);
                let ms = ((capped.as_millis() as f64) * factor).round() as u64;
                Duration::from_millis(ms).min(self.max_delay)
            }
            None => {
                let exp = retry.saturating_sub(1).min(16);
                let base = self
                    .base_delay
                    .saturating_mul(1u32 << exp)
                    .min(self.max_delay);
                let upper = base.as_millis() as u64;
                Duration::from_millis(rng.gen_range(upper / 2..=upper))
            }
        }
    }
}
