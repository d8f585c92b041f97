//! Dispatch configuration.

use std::time::Duration;

use crate::queue::ExponentialBackoff;
use crate::{Error, Result};

/// Tunables for a dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Maximum number of queue entries claimed by one pass.
    pub batch_size: u32,
    /// Failed attempts after which a message is abandoned instead of deferred.
    ///
    /// An entry that fails while it already carries `max_retries` retries is
    /// abandoned, so a message gets at most `max_retries + 1` attempts.
    pub max_retries: u32,
    /// How long a claimed entry stays invisible to other passes.
    pub lease: Duration,
    /// Upper bound for a single transport call.
    pub transport_timeout: Duration,
    /// Default retry curve.
    pub backoff: ExponentialBackoff,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            lease: Duration::from_secs(10 * 60),
            transport_timeout: Duration::from_secs(60),
            backoff: ExponentialBackoff::default(),
        }
    }
}

impl DispatchConfig {
    /// Check that the configuration can drive a pass safely.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a limit is zero, or if the lease does not
    /// outlast the transport timeout (a slow send could then be claimed by a
    /// second pass while still in flight).
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.transport_timeout.is_zero() {
            return Err(Error::Config("transport_timeout must be positive".to_string()));
        }
        if self.lease <= self.transport_timeout {
            return Err(Error::Config(format!(
                "lease ({}s) must be longer than transport_timeout ({}s)",
                self.lease.as_secs_f64(),
                self.transport_timeout.as_secs_f64()
            )));
        }
        if self.backoff.base.is_zero() || self.backoff.max < self.backoff.base {
            return Err(Error::Config(
                "backoff base must be positive and not exceed its maximum".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DispatchConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_batch_rejected() {
        let config = DispatchConfig {
            batch_size: 0,
            ..DispatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn lease_must_outlast_timeout() {
        let config = DispatchConfig {
            lease: Duration::from_secs(60),
            transport_timeout: Duration::from_secs(60),
            ..DispatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn backoff_bounds_checked() {
        let config = DispatchConfig {
            backoff: ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(5)),
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
