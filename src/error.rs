//! crate error types

use snafu::prelude::*;

use crate::config::{ConfigError, InvalidPolicyError};

/// crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// crate error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    /// Load config from environment failed
    #[snafu(display("load config failed: {source}"))]
    LoadConfigFailed {
        /// source error
        source: ConfigError,
    },

    /// Reconnect policy can not be used
    #[snafu(display("invalid reconnect policy: {source}"))]
    InvalidPolicy {
        /// source error
        source: InvalidPolicyError,
    },

    /// Manager created outside a tokio runtime
    #[snafu(display("no tokio runtime to run sockets and timers on: {source}"))]
    NoRuntime {
        /// source error
        source: tokio::runtime::TryCurrentError,
    },
}
