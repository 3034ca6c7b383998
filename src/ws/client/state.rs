use std::{fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};

use crate::config::ReconnectPolicy;

/// Connection health, exactly one is current at any time
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// a socket is being opened
    Connecting,
    /// socket is open, messages flow
    Connected,
    /// idle, either never connected or stopped by caller
    Disconnected,
    /// transport failed, always followed by retrying or disconnected
    Error,
    /// waiting for the reconnect timer
    Retrying,
}

impl ConnectionState {
    /// get state name as it appears in state json
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Retrying => "retrying",
        }
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification pushed to observers on every state transition
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    /// new state
    pub state: ConnectionState,
    /// reconnect attempts made in this retry session
    pub attempts: u32,
    /// delay until next attempt, zero unless state is retrying
    #[serde(rename = "nextRetryIn", with = "millis")]
    pub next_retry_in: Duration,
}

impl StateEvent {
    pub(crate) fn idle() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            next_retry_in: Duration::ZERO,
        }
    }

    /// encode as `{"state":..,"attempts":..,"nextRetryIn":..}`, delay in milliseconds
    pub fn to_json(&self) -> String {
        // plain struct, serializing can not fail
        serde_json::to_string(self).unwrap()
    }

    /// True when UI should show actionable help instead of a plain spinner
    pub fn needs_attention(&self, threshold: u32) -> bool {
        self.state != ConnectionState::Connected && self.attempts > threshold
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let ms = d.as_secs_f64() * 1000.0;
        if ms.fract() == 0.0 {
            s.serialize_u64(ms as u64)
        } else {
            s.serialize_f64(ms)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        if ms.is_finite() && ms >= 0.0 {
            Ok(Duration::from_secs_f64(ms / 1000.0))
        } else {
            Err(serde::de::Error::custom(format!("invalid delay {}", ms)))
        }
    }
}

/// Retry bookkeeping of one connect-to-disconnect cycle
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RetrySession {
    /// delay used by the next scheduled retry
    pub current_interval: Duration,
    /// retries scheduled since last connect call or successful open
    pub attempts: u32,
}

impl RetrySession {
    pub(crate) fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            current_interval: policy.initial_interval,
            attempts: 0,
        }
    }

    pub(crate) fn reset(&mut self, policy: &ReconnectPolicy) {
        *self = Self::new(policy);
    }
}
