//! Reconnect state machine.
//!
//! [`Machine::step`] is a pure function of (current state, input) returning the
//! side effects the driver must perform, in order. The driver owns sockets and
//! timers; the machine only refers to them by generation and timer id.

use std::time::Duration;

use super::state::{ConnectionState, RetrySession, StateEvent};
use crate::config::ReconnectPolicy;

/// Identifies one socket attempt, inputs from older generations are stale
pub(crate) type Generation = u64;

/// Identifies one armed reconnect timer
pub(crate) type TimerId = u64;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Input {
    /// caller asks to (re)connect
    Connect,
    /// caller asks to stop
    Disconnect,
    /// socket handshake finished
    Opened { generation: Generation },
    /// text frame arrived
    Received {
        generation: Generation,
        payload: String,
    },
    /// socket could not be built or broke, no close will follow
    Errored { generation: Generation },
    /// socket closed
    Closed { generation: Generation },
    /// reconnect timer fired
    TimerFired { timer: TimerId },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    /// push event to state observers
    Emit(StateEvent),
    /// detach and close the socket of this generation
    Teardown { generation: Generation },
    /// create a socket for this generation
    Open { generation: Generation },
    /// arm one-shot timer
    ArmTimer { timer: TimerId, delay: Duration },
    /// cancel armed timer
    CancelTimer { timer: TimerId },
    /// push payload to message observers
    Deliver(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketSlot {
    generation: Generation,
    open: bool,
}

#[derive(Debug)]
pub(crate) struct Machine {
    policy: ReconnectPolicy,
    event: StateEvent,
    session: RetrySession,
    intentional_disconnect: bool,
    socket: Option<SocketSlot>,
    timer: Option<TimerId>,
    next_id: u64,
}

impl Machine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            session: RetrySession::new(&policy),
            policy,
            event: StateEvent::idle(),
            intentional_disconnect: false,
            socket: None,
            timer: None,
            next_id: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.event.state
    }

    /// last emitted event
    pub fn last_event(&self) -> StateEvent {
        self.event
    }

    pub fn session(&self) -> RetrySession {
        self.session
    }

    /// generation of the live or opening socket
    pub fn current_generation(&self) -> Option<Generation> {
        self.socket.map(|s| s.generation)
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.timer
    }

    pub fn step(&mut self, input: Input) -> Vec<Effect> {
        use ConnectionState::*;

        let mut effects = Vec::new();
        let fx = &mut effects;

        match input {
            Input::Connect => {
                self.intentional_disconnect = false;
                self.session.reset(&self.policy);
                self.cancel_timer(fx);
                self.attempt_connection(fx);
            }
            Input::Disconnect => {
                self.intentional_disconnect = true;
                // already idle, emit nothing
                if self.state() != Disconnected || self.socket.is_some() || self.timer.is_some() {
                    self.cancel_timer(fx);
                    self.teardown(fx);
                    self.transition(Disconnected, Duration::ZERO, fx);
                }
            }
            Input::Opened { generation } => {
                if let Some(slot) = self.socket.as_mut().filter(|s| s.generation == generation) {
                    slot.open = true;
                    // the event reports how many retries this success took
                    self.transition(Connected, Duration::ZERO, fx);
                    self.session.reset(&self.policy);
                }
            }
            Input::Received {
                generation,
                payload,
            } => {
                if matches!(self.socket, Some(s) if s.generation == generation && s.open) {
                    fx.push(Effect::Deliver(payload));
                }
            }
            Input::Errored { generation } => {
                if let Some(slot) = self.take_current(generation, fx) {
                    self.transition(Error, Duration::ZERO, fx);
                    // an opened socket shares the close path
                    if slot.open {
                        self.on_closed(fx);
                    } else if !self.intentional_disconnect && self.timer.is_none() {
                        self.schedule_reconnect(fx);
                    }
                }
            }
            Input::Closed { generation } => {
                if self.take_current(generation, fx).is_some() {
                    self.on_closed(fx);
                }
            }
            Input::TimerFired { timer } => {
                if self.timer == Some(timer) {
                    self.timer = None;
                    self.session.current_interval = self.policy.grow(self.session.current_interval);
                    self.attempt_connection(fx);
                }
            }
        }

        effects
    }

    fn on_closed(&mut self, effects: &mut Vec<Effect>) {
        if self.intentional_disconnect {
            self.transition(ConnectionState::Disconnected, Duration::ZERO, effects);
        } else if self.timer.is_none() {
            self.schedule_reconnect(effects);
        }
    }

    fn attempt_connection(&mut self, effects: &mut Vec<Effect>) {
        if self.intentional_disconnect {
            log::debug!("Skip connection attempt after intentional disconnect");
            return;
        }

        self.transition(ConnectionState::Connecting, Duration::ZERO, effects);
        self.teardown(effects);

        let generation = self.fresh_id();
        self.socket = Some(SocketSlot {
            generation,
            open: false,
        });
        effects.push(Effect::Open { generation });
    }

    fn schedule_reconnect(&mut self, effects: &mut Vec<Effect>) {
        self.session.attempts += 1;
        let delay = self.session.current_interval;
        self.transition(ConnectionState::Retrying, delay, effects);

        let timer = self.fresh_id();
        self.timer = Some(timer);
        effects.push(Effect::ArmTimer { timer, delay });
    }

    fn cancel_timer(&mut self, effects: &mut Vec<Effect>) {
        if let Some(timer) = self.timer.take() {
            effects.push(Effect::CancelTimer { timer });
        }
    }

    fn teardown(&mut self, effects: &mut Vec<Effect>) {
        if let Some(slot) = self.socket.take() {
            effects.push(Effect::Teardown {
                generation: slot.generation,
            });
        }
    }

    /// detach the socket if `generation` is current
    fn take_current(
        &mut self,
        generation: Generation,
        effects: &mut Vec<Effect>,
    ) -> Option<SocketSlot> {
        let slot = self.socket.filter(|s| s.generation == generation)?;
        self.teardown(effects);
        Some(slot)
    }

    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn transition(&mut self, state: ConnectionState, delay: Duration, effects: &mut Vec<Effect>) {
        log::debug!(
            "Connection state {} -> {}, attempts {}, next retry in {:?}",
            self.event.state,
            state,
            self.session.attempts,
            delay
        );

        self.event = StateEvent {
            state,
            attempts: self.session.attempts,
            next_retry_in: delay,
        };
        effects.push(Effect::Emit(self.event));
    }
}
