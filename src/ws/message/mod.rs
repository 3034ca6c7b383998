//! Gesture service websocket message types.
//!
//! Every frame is a newline-free JSON object tagged by its `type` field.

mod types;

pub use types::{Gesture, Hand, Status, Subscribed, Timestamp, Welcome};

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Error when parse text frame as message
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum ParseMessageError {
    /// data is invalid json
    #[snafu(display("parse json failed: {source}"))]
    ParseJSONFailed {
        /// data for decode
        data: String,
        /// source error
        source: serde_json::Error,
    },

    /// data json is not an object
    #[snafu(display("parsed message is not object: {json}"))]
    MessageNotObject {
        /// json string
        json: String,
    },

    /// data json has no string type field
    #[snafu(display("message has no string type field: {json}"))]
    NoMessageType {
        /// json string
        json: String,
    },

    /// data json has an unknown type
    #[snafu(display("message has unknown type {t:?}"))]
    UnknownMessageType {
        /// type name
        t: String,
    },

    /// data json is not valid typed message
    #[snafu(display("parse to {type_name} message failed: {source}"))]
    ParseJSONToTypedMessageFailed {
        /// type name
        type_name: String,
        /// source error
        source: serde_json::Error,
    },
}

impl ParseMessageError {
    /// Check if the frame was well formed but of a type this crate does not know
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownMessageType { .. })
    }
}

/// Gesture service websocket protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Subscribe, client -> service
    Subscribe,
    /// Subscribed, service -> client
    Subscribed(Subscribed),
    /// Gesture, service -> client
    Gesture(Gesture),
    /// Ping, either side
    Ping(Timestamp),
    /// Pong, either side
    Pong(Timestamp),
    /// Status, service -> client
    Status(Status),
    /// Welcome, service -> client
    Welcome(Welcome),
    /// Heartbeat, service -> client
    Heartbeat(Timestamp),
}

impl Message {
    /// Decode a text frame to a message
    pub fn decode(data: &str) -> Result<Self, ParseMessageError> {
        let value: serde_json::Value =
            serde_json::from_str(data).context(error::ParseJSONFailed { data })?;

        let obj = value
            .as_object()
            .with_context(|| error::MessageNotObject { json: data })?;

        let t = obj
            .get("type")
            .and_then(|t| t.as_str())
            .with_context(|| error::NoMessageType { json: data })?;

        ensure!(
            Self::TYPE_NAMES.contains(&t),
            error::UnknownMessageType { t }
        );

        let type_name = t.to_string();

        serde_json::from_value(value).context(error::ParseJSONToTypedMessageFailed { type_name })
    }

    /// encode message to a text frame
    pub fn encode(&self) -> String {
        // all keys are strings and no custom serializer can fail
        serde_json::to_string(self).unwrap()
    }

    const TYPE_NAMES: [&'static str; 8] = [
        "subscribe",
        "subscribed",
        "gesture",
        "ping",
        "pong",
        "status",
        "welcome",
        "heartbeat",
    ];

    /// get type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Subscribed(_) => "subscribed",
            Self::Gesture(_) => "gesture",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Status(_) => "status",
            Self::Welcome(_) => "welcome",
            Self::Heartbeat(_) => "heartbeat",
        }
    }
}
