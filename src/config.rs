//! Link configuration: endpoint and reconnect policy.

use std::{env, str::FromStr, time::Duration};

use snafu::prelude::*;

/// default service endpoint, the gesture service listens on 5001
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:5001";

const ENV_ENDPOINT: &str = "GESTURE_WS_URL";
const ENV_INITIAL_MS: &str = "GESTURE_RECONNECT_INITIAL_MS";
const ENV_MAX_MS: &str = "GESTURE_RECONNECT_MAX_MS";
const ENV_MULTIPLIER: &str = "GESTURE_RECONNECT_MULTIPLIER";

/// Error when a reconnect policy is not usable
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(policy_error), context(suffix(false)))]
pub enum InvalidPolicyError {
    /// initial interval is zero
    #[snafu(display("initial reconnect interval must be > 0"))]
    ZeroInitial,

    /// max interval is smaller than initial interval
    #[snafu(display("max reconnect interval {max:?} is smaller than initial interval {initial:?}"))]
    MaxBelowInitial {
        /// initial interval
        initial: Duration,
        /// max interval
        max: Duration,
    },

    /// multiplier is below 1 or not finite
    #[snafu(display("backoff multiplier {multiplier} must be a finite number >= 1.0"))]
    BadMultiplier {
        /// given multiplier
        multiplier: f64,
    },
}

/// Error when load config from environment
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(config_error), context(suffix(false)))]
pub enum ConfigError {
    /// env var is set but is not a valid number
    #[snafu(display("env var {key} has invalid value {value:?}"))]
    InvalidNumber {
        /// env var name
        key: &'static str,
        /// raw value
        value: String,
    },

    /// loaded policy is invalid
    #[snafu(display("invalid reconnect policy: {source}"))]
    InvalidPolicy {
        /// source error
        source: InvalidPolicyError,
    },
}

/// How the retry delay grows between reconnect attempts.
///
/// Delays follow `initial, initial·k, initial·k², …` clamped at `max_interval`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// first retry delay, also the delay after every successful connection
    pub initial_interval: Duration,
    /// upper bound of the retry delay
    pub max_interval: Duration,
    /// growth factor applied after each failed attempt
    pub backoff_multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(3000),
            max_interval: Duration::from_millis(30000),
            backoff_multiplier: 1.5,
        }
    }
}

impl ReconnectPolicy {
    /// Check policy values can produce a bounded, non-shrinking delay sequence
    pub fn validate(&self) -> Result<(), InvalidPolicyError> {
        ensure!(!self.initial_interval.is_zero(), policy_error::ZeroInitial);
        ensure!(
            self.max_interval >= self.initial_interval,
            policy_error::MaxBelowInitial {
                initial: self.initial_interval,
                max: self.max_interval,
            }
        );
        ensure!(
            self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0,
            policy_error::BadMultiplier {
                multiplier: self.backoff_multiplier
            }
        );
        Ok(())
    }

    /// Next delay after `current` failed, clamped at max interval
    pub fn grow(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.backoff_multiplier)
            .min(self.max_interval)
    }
}

/// Link configuration, read once at construction
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// raw endpoint url, validated on every connection attempt
    pub endpoint: String,
    /// reconnect backoff policy
    pub policy: ReconnectPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            policy: ReconnectPolicy::default(),
        }
    }
}

impl Config {
    /// Load config from `GESTURE_*` env vars, missing vars fall back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            config.endpoint = endpoint;
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_INITIAL_MS)? {
            config.policy.initial_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_MAX_MS)? {
            config.policy.max_interval = Duration::from_millis(ms);
        }
        if let Some(k) = parse_var::<f64, _>(&lookup, ENV_MULTIPLIER)? {
            config.policy.backoff_multiplier = k;
        }

        config.policy.validate().context(config_error::InvalidPolicy)?;

        log::debug!("Loaded config: {:?}", config);

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => match value.trim().parse() {
            Ok(v) => Ok(Some(v)),
            Err(_) => config_error::InvalidNumber { key, value }.fail(),
        },
    }
}
