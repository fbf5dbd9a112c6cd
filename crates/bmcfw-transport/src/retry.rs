//! Retry policy for single transport exchanges.

use core::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound accepted for [`RetryPolicy::max_attempts`].
pub const MAX_ATTEMPTS_LIMIT: u32 = 5;

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed {
        /// Delay in milliseconds
        delay_ms: u64,
    },
    /// Doubling delay, capped
    Exponential {
        /// Delay before the first retry in milliseconds
        base_ms: u64,
        /// Cap in milliseconds
        max_ms: u64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed { delay_ms: 100 }
    }
}

/// How many times a retryable exchange is attempted and how long to wait in
/// between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first, `1..=5`
    pub max_attempts: u32,
    /// Delay schedule
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed { delay_ms: 0 },
        }
    }

    /// Fixed delay policy.
    ///
    /// Delays beyond `u64::MAX` milliseconds saturate.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed {
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            },
        }
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms, max_ms } => {
                let shift = attempt.saturating_sub(1).min(16);
                let delay = base_ms.saturating_mul(1u64 << shift);
                Duration::from_millis(delay.min(max_ms))
            }
        }
    }

    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(format!(
                "max_attempts must be in 1..={MAX_ATTEMPTS_LIMIT}, got {}",
                self.max_attempts
            ));
        }
        if let Backoff::Exponential { base_ms, max_ms } = self.backoff
            && base_ms > max_ms
        {
            return Err(format!(
                "exponential backoff base {base_ms}ms exceeds cap {max_ms}ms"
            ));
        }
        Ok(())
    }
}
