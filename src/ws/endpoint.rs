//! Websocket endpoint address.

use std::{fmt::Display, str::FromStr};

use snafu::prelude::*;

/// Parse string as endpoint url error
#[derive(Debug, Snafu)]
#[snafu(
    visibility(pub(crate)),
    module(parse_endpoint_error_variant),
    context(suffix(false))
)]
pub enum ParseEndpointError {
    #[snafu(display("{s} is an invalid url: {source}"))]
    /// the str is not a valid url
    InvalidURL {
        /// string be parsed
        s: String,
        /// source error
        source: url::ParseError,
    },

    /// the parsed url schema is not websocket
    #[snafu(display("the url {s} has invalid schema {schema}, only ws or wss is ok"))]
    InvalidSchema {
        /// the url
        s: String,
        /// invalid schema
        schema: String,
    },

    /// the parsed url has no host
    #[snafu(display("the endpoint url {s} has no host"))]
    NoHost {
        /// the url
        s: String,
    },
}

/// A validated `ws://` or `wss://` endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: url::Url,
}

impl Endpoint {
    /// the full url
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// endpoint host
    pub fn host(&self) -> &str {
        // checked non-empty when parsing
        self.url.host_str().unwrap_or_default()
    }

    /// endpoint port, falls back to the schema default
    pub fn port(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }
}

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = url::Url::parse(s)
            .with_context(|_| parse_endpoint_error_variant::InvalidURL { s: s.to_string() })?;

        ensure!(
            url.scheme() == "wss" || url.scheme() == "ws",
            parse_endpoint_error_variant::InvalidSchema {
                s,
                schema: url.scheme(),
            }
        );

        ensure!(
            url.host_str().map(|h| !h.is_empty()).unwrap_or(false),
            parse_endpoint_error_variant::NoHost { s }
        );

        Ok(Self { url })
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.url.fmt(f)
    }
}
