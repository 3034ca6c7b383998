//! Reconnecting websocket client

mod machine;
mod manager;
#[cfg(test)]
pub(crate) mod mock;
mod observer;
mod state;

pub(crate) use manager::WeakConnectionManager;
pub use manager::ConnectionManager;
pub(crate) use observer::Observers;
pub use observer::ObserverId;
pub use state::{ConnectionState, RetrySession, StateEvent};
