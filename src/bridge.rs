//! Relay between a [`ConnectionManager`] and a UI layer.
//!
//! The bridge decodes inbound frames, pushes gestures and connection state
//! JSON to UI callbacks, and forwards UI outbound messages to the manager. It
//! also does the protocol chores: subscribe on every connect, answer pings.

use std::{fmt::Debug, sync::Arc};

use crate::ws::{
    client::{Observers, WeakConnectionManager},
    message::{Gesture, Message},
    ConnectionManager, ConnectionState, ObserverId, StateEvent,
};

/// Registration returned by the bridge, call [`Subscription::unsubscribe`] to remove it.
///
/// Dropping it keeps the callback registered.
pub struct Subscription {
    cancel: Box<dyn FnOnce() + Send + Sync>,
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

impl Subscription {
    fn new<T: ?Sized + 'static>(observers: &Arc<Observers<T>>, id: ObserverId) -> Self {
        let observers = Arc::downgrade(observers);
        Self {
            cancel: Box::new(move || {
                if let Some(observers) = observers.upgrade() {
                    observers.remove(id);
                }
            }),
        }
    }

    /// remove the callback
    pub fn unsubscribe(self) {
        (self.cancel)()
    }
}

/// UI notification bridge
#[derive(Debug)]
pub struct NotificationBridge {
    manager: ConnectionManager,
    gestures: Arc<Observers<Gesture>>,
    states: Arc<Observers<str>>,
    state_observer: ObserverId,
    message_observer: ObserverId,
}

impl NotificationBridge {
    /// Attach a bridge to manager, it can be created before or after `connect`
    pub fn new(manager: ConnectionManager) -> Self {
        let gestures: Arc<Observers<Gesture>> = Arc::default();
        let states: Arc<Observers<str>> = Arc::default();

        let state_observer = {
            let weak = manager.downgrade();
            let states = states.clone();
            manager.on_state_change(move |event| on_state_change(&weak, &states, event))
        };

        let message_observer = {
            let weak = manager.downgrade();
            let gestures = gestures.clone();
            manager.on_message(move |payload| on_message(&weak, &gestures, payload))
        };

        Self {
            manager,
            gestures,
            states,
            state_observer,
            message_observer,
        }
    }

    /// Register a callback for every decoded gesture
    pub fn on_gesture<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Gesture) + Send + Sync + 'static,
    {
        let id = self.gestures.add(callback);
        Subscription::new(&self.gestures, id)
    }

    /// Register a callback for every connection state change, in JSON
    pub fn on_connection_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.states.add(callback);
        Subscription::new(&self.states, id)
    }

    /// current connection state JSON, for rendering before the first push
    pub fn connection_state(&self) -> String {
        self.manager.state_event().to_json()
    }

    /// Send a UI message to the service, false when not connected
    pub fn send<S: Into<String>>(&self, payload: S) -> bool {
        self.manager.send_message(payload)
    }

    /// the relayed manager
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }
}

impl Drop for NotificationBridge {
    fn drop(&mut self) {
        self.manager.remove_state_observer(self.state_observer);
        self.manager.remove_message_observer(self.message_observer);
    }
}

fn on_state_change(manager: &WeakConnectionManager, states: &Observers<str>, event: &StateEvent) {
    if event.state == ConnectionState::Connected {
        if let Some(manager) = manager.upgrade() {
            log::debug!("Connected, subscribe to gestures");
            manager.send_message(Message::Subscribe.encode());
        }
    }

    states.notify(event.to_json().as_str());
}

fn on_message(manager: &WeakConnectionManager, gestures: &Observers<Gesture>, payload: &str) {
    let message = match Message::decode(payload) {
        Ok(message) => message,
        Err(err) if err.is_unknown_type() => {
            log::debug!("Ignore message: {}", err);
            return;
        }
        Err(err) => {
            log::warn!("Received malformed message: {}", err);
            return;
        }
    };

    match message {
        Message::Gesture(gesture) => {
            log::debug!("Received gesture: {:?}", gesture);
            gestures.notify(&gesture);
        }
        Message::Ping(ts) => {
            if let Some(manager) = manager.upgrade() {
                manager.send_message(Message::Pong(ts).encode());
            }
        }
        Message::Subscribed(s) => log::info!("Subscription status: {}", s.status),
        Message::Status(s) => log::info!("Service status: {}", s.status),
        Message::Welcome(w) => log::info!("Service welcome: {:?}", w),
        other => log::trace!("Ignore {} message", other.type_name()),
    }
}
