//! Gesture service websocket link

pub mod client;
mod endpoint;
pub mod message;
pub mod transport;

pub use client::{ConnectionManager, ConnectionState, ObserverId, RetrySession, StateEvent};
pub use endpoint::{Endpoint, ParseEndpointError};
pub use message::{Message, ParseMessageError};
pub use transport::{Transport, TransportError, TungsteniteTransport};
