//! # Gesture Link
//!
//! A self-healing websocket link to a gesture recognition service.
//!
//! [`ConnectionManager`] keeps one connection alive with exponential backoff
//! and reports its health as [`StateEvent`]s. [`NotificationBridge`] sits on
//! top of it, decoding gestures for a UI layer.

#![deny(clippy::all)]
#![deny(missing_debug_implementations, missing_docs)]
#![forbid(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod ws;

mod error;
pub use error::{Error, Result};

pub use bridge::{NotificationBridge, Subscription};
pub use config::{Config, ReconnectPolicy};
pub use ws::{ConnectionManager, ConnectionState, StateEvent};
