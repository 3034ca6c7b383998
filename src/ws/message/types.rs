use serde::{Deserialize, Serialize};

/// Which hand performed a gesture
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hand {
    /// left hand
    Left,
    /// right hand
    Right,
}

/// Recognized gesture event, service -> client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gesture {
    /// gesture name, the backend service calls this field `gesture`
    #[serde(alias = "gesture")]
    pub name: String,
    /// performing hand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hand: Option<Hand>,
    /// detection time, epoch number or ISO-8601 string depending on sender
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub timestamp: serde_json::Value,
    /// fields this crate does not model, e.g. `confidence`
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A util structure to hold only timestamp field, used by ping and pong
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// sender's timestamp, echoed back unchanged
    #[serde(default)]
    pub timestamp: serde_json::Value,
}

/// Subscribe reply data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscribed {
    /// `success` when accepted
    pub status: String,
}

/// Service status notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// status word, like `started` or `stopping`
    pub status: String,
    /// reporting service name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// other details attached by the service
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Greeting sent by the service right after accepting a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    /// service name
    pub service: String,
}
