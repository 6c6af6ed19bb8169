//! Configuration types for the lease client
//!
//! This module defines the client configuration and the renewal policy
//! derived from it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::lease::Scope;

/// Lease client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Scope consulted first when loading the server location
    #[serde(default = "default_scope")]
    pub scope: Scope,

    /// Fraction of the lease duration after which renewal starts
    ///
    /// Must be strictly between 0 and 1 so a retry window remains before expiry.
    #[serde(default = "default_renew_at_fraction")]
    pub renew_at_fraction: f64,

    /// First backoff delay after a failed renewal (in milliseconds)
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Upper bound for the backoff delay (in seconds)
    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,

    /// Maximum renewal attempts per renewal window
    ///
    /// Retries never run past expiry regardless of this value.
    /// Set to 0 to bound retries by expiry alone.
    #[serde(default = "default_max_renew_attempts")]
    pub max_renew_attempts: u32,

    /// Connect timeout for lease server calls (in seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Total timeout for a single lease server call (in seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Capacity of the client event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Refuse to request a lease until a callback is registered
    #[serde(default)]
    pub require_callback: bool,

    /// Largest tolerated difference between local and server time (in seconds)
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,
}

impl ClientConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            scope: default_scope(),
            renew_at_fraction: default_renew_at_fraction(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_secs: default_retry_max_delay_secs(),
            max_renew_attempts: default_max_renew_attempts(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            require_callback: false,
            max_clock_skew_secs: default_max_clock_skew_secs(),
        }
    }

    /// Set the preferred scope
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !(self.renew_at_fraction > 0.0 && self.renew_at_fraction < 1.0) {
            return Err(crate::Error::config(format!(
                "renew_at_fraction must be between 0 and 1 (exclusive), got {}",
                self.renew_at_fraction
            )));
        }

        if self.retry_initial_delay_ms == 0 {
            return Err(crate::Error::config("retry_initial_delay_ms must be > 0"));
        }

        if self.retry_max_delay_secs.saturating_mul(1000) < self.retry_initial_delay_ms {
            return Err(crate::Error::config(
                "retry_max_delay_secs must not be shorter than retry_initial_delay_ms",
            ));
        }

        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(crate::Error::config("timeouts must be > 0"));
        }

        if self.connect_timeout_secs > self.request_timeout_secs {
            return Err(crate::Error::config(
                "connect_timeout_secs must not exceed request_timeout_secs",
            ));
        }

        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }

        Ok(())
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Total request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Largest tolerated clock skew
    pub fn max_clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_clock_skew_secs.min(i64::MAX as u64) as i64)
    }

    /// Renewal policy derived from this configuration
    pub fn renewal_policy(&self) -> RenewalPolicy {
        RenewalPolicy {
            renew_at_fraction: self.renew_at_fraction,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
            max_attempts: self.max_renew_attempts,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// When to renew and how to back off between failed renewals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenewalPolicy {
    /// Fraction of the lease duration after which renewal starts
    pub renew_at_fraction: f64,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for the delay between retries
    pub max_delay: Duration,
    /// Attempts per renewal window (0 = bounded by expiry only)
    pub max_attempts: u32,
}

impl RenewalPolicy {
    /// Time after a grant at which renewal should start
    pub fn renew_after(&self, lease_duration: Duration) -> Duration {
        lease_duration.mul_f64(self.renew_at_fraction)
    }

    /// Delay before retry number `attempt` (1-based), doubling up to the cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts` failures
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }
}

fn default_scope() -> Scope {
    Scope::User
}

fn default_renew_at_fraction() -> f64 {
    0.8
}

fn default_retry_initial_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_secs() -> u64 {
    60
}

fn default_max_renew_attempts() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    64
}

fn default_max_clock_skew_secs() -> u64 {
    24 * 60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_fraction() {
        let mut config = ClientConfig::default();
        config.renew_at_fraction = 1.0;
        assert!(config.validate().is_err());

        config.renew_at_fraction = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_timeouts() {
        let mut config = ClientConfig::default();
        config.connect_timeout_secs = 60;
        config.request_timeout_secs = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"scope": "system", "max_renew_attempts": 3}"#).unwrap();
        assert_eq!(config.scope, Scope::System);
        assert_eq!(config.max_renew_attempts, 3);
        assert_eq!(config.renew_at_fraction, 0.8);
        assert!(!config.require_callback);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RenewalPolicy {
            renew_at_fraction: 0.8,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_attempts: 0,
        };

        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn test_renew_after_fraction() {
        let policy = ClientConfig::default().renewal_policy();
        let renew_after = policy.renew_after(Duration::from_secs(300));
        assert!((renew_after.as_secs_f64() - 240.0).abs() < 1e-6);
    }

    #[test]
    fn test_attempt_budget() {
        let mut policy = ClientConfig::default().renewal_policy();
        policy.max_attempts = 2;
        assert!(policy.allows_attempt(1));
        assert!(!policy.allows_attempt(2));

        policy.max_attempts = 0;
        assert!(policy.allows_attempt(1000));
    }
}
