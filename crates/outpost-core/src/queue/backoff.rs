//! Retry delay policies.

use std::time::Duration;

/// Decides how long a failed delivery waits before its next attempt.
///
/// Implemented by [`ExponentialBackoff`] and by any `Fn(u32) -> Duration`,
/// so the retry curve can be swapped without touching queue mechanics.
pub trait BackoffPolicy: Send + Sync {
    /// Delay before the next attempt, given the number of failures recorded
    /// before the one that just happened.
    fn delay(&self, retries: u32) -> Duration;
}

impl<F> BackoffPolicy for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, retries: u32) -> Duration {
        self(retries)
    }
}

/// `base * 2^retries`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
}

impl ExponentialBackoff {
    /// Creates a new exponential policy.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            max: Duration::from_secs(60 * 60),
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, retries: u32) -> Duration {
        let factor = 2u32.checked_pow(retries).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
